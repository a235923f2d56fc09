//! Player lifecycle.
//!
//! A [`MusicPlayer`] moves through `Idle → Created → Playing → Stopped → Destroyed`:
//! - `create` opens the source, picks the first audio stream and opens its decoder
//! - `play` spawns the read loop and opens the output device bound to the callback
//! - `stop` stops the session, closes the device and joins the read loop
//! - `destroy` stops and releases the source and decoder
//!
//! Playing again after `stop` needs a fresh `create`.

use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::config::PlaybackConfig;
use crate::decode::DecodeStage;
use crate::device::CpalOutput;
use crate::diagnostics::{DiagnosticSink, TracingSink};
use crate::error::{PlayerError, SetupError};
use crate::output::{AudioOutput, OutputFormat};
use crate::playback::AudioCallback;
use crate::queue::PacketQueue;
use crate::read_loop::ReadLoop;
use crate::resample::FrameConverter;
use crate::source::{AudioDecoder, Demuxer, SourceOpener, StreamInfo, find_audio_stream};
use crate::status::{PlaybackCounters, PlayerStatus};
use crate::symphonia_backend::{MemoryOpener, SymphoniaOpener};

/// Lifecycle state of a [`MusicPlayer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerState {
    /// Not created, or the last `create` failed.
    Idle,
    Created,
    Playing,
    Stopped,
    Destroyed,
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlayerState::Idle => "idle",
            PlayerState::Created => "created",
            PlayerState::Playing => "playing",
            PlayerState::Stopped => "stopped",
            PlayerState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Session notifications, delivered in the order they were sent per thread.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlayerEvent {
    /// `play` succeeded and the device is running.
    Started,
    /// The read loop reached the end of the source.
    SourceExhausted,
    /// Every queued packet was decoded; playback ended on its own.
    Finished,
    /// `stop` (or `destroy`) ended the session.
    Stopped,
    /// The session ended on a read or queue failure.
    Failed(String),
}

/// Construction options for [`MusicPlayer`].
#[derive(Clone)]
pub struct PlayerOptions {
    pub config: PlaybackConfig,
    /// Output device name substring; `None` selects the host default.
    pub device: Option<String>,
    pub sink: Arc<dyn DiagnosticSink>,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            config: PlaybackConfig::default(),
            device: None,
            sink: Arc::new(TracingSink),
        }
    }
}

struct Session {
    stream: StreamInfo,
    demuxer: Option<Box<dyn Demuxer>>,
    decoder: Option<Box<dyn AudioDecoder>>,
}

/// Plays one audio source on one output device.
pub struct MusicPlayer {
    identifier: String,
    config: PlaybackConfig,
    sink: Arc<dyn DiagnosticSink>,
    opener: Box<dyn SourceOpener>,
    output: Box<dyn AudioOutput>,
    state: PlayerState,
    session: Option<Session>,
    queue: Arc<PacketQueue>,
    reader: Option<JoinHandle<Box<dyn Demuxer>>>,
    output_format: Option<OutputFormat>,
    counters: Arc<PlaybackCounters>,
    events_tx: Sender<PlayerEvent>,
    events_rx: Receiver<PlayerEvent>,
}

impl MusicPlayer {
    /// Player for a local file, decoded with Symphonia and played through CPAL.
    pub fn new(identifier: impl Into<String>, options: PlayerOptions) -> Self {
        let output = CpalOutput::new(options.device.clone(), options.config.device_buffer_frames);
        Self::with_backends(
            identifier,
            options,
            Box::new(SymphoniaOpener),
            Box::new(output),
        )
    }

    /// Player for a container already loaded into memory. `label` names it in logs and
    /// status; its extension is used as the format hint.
    pub fn from_bytes(label: impl Into<String>, bytes: Vec<u8>, options: PlayerOptions) -> Self {
        let output = CpalOutput::new(options.device.clone(), options.config.device_buffer_frames);
        Self::with_backends(
            label,
            options,
            Box::new(MemoryOpener::new(bytes)),
            Box::new(output),
        )
    }

    pub fn with_backends(
        identifier: impl Into<String>,
        options: PlayerOptions,
        opener: Box<dyn SourceOpener>,
        output: Box<dyn AudioOutput>,
    ) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            identifier: identifier.into(),
            config: options.config,
            sink: options.sink,
            opener,
            output,
            state: PlayerState::Idle,
            session: None,
            queue: Arc::new(PacketQueue::new()),
            reader: None,
            output_format: None,
            counters: Arc::new(PlaybackCounters::default()),
            events_tx,
            events_rx,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    /// Open the source and its decoder. No thread is started.
    ///
    /// Failures are also reported to the diagnostic sink and leave the player `Idle`.
    pub fn create(&mut self) -> Result<(), PlayerError> {
        if matches!(self.state, PlayerState::Playing | PlayerState::Destroyed) {
            return Err(PlayerError::InvalidState {
                action: "create",
                state: self.state,
            });
        }

        self.session = None;
        self.output_format = None;

        match self.open_session() {
            Ok(session) => {
                tracing::info!(
                    source = %self.identifier,
                    stream = session.stream.index,
                    codec = session.stream.codec.as_deref().unwrap_or("unknown"),
                    rate_hz = session.stream.sample_rate.unwrap_or(0),
                    channels = session.stream.channels.unwrap_or(0),
                    "source opened"
                );
                self.session = Some(session);
                self.queue = Arc::new(PacketQueue::new());
                self.state = PlayerState::Created;
                Ok(())
            }
            Err(e) => {
                self.sink.report(&format!("{}: {e}", self.identifier));
                self.state = PlayerState::Idle;
                Err(e.into())
            }
        }
    }

    fn open_session(&self) -> Result<Session, SetupError> {
        let demuxer = self.opener.open(&self.identifier)?;
        let stream = find_audio_stream(demuxer.streams())
            .cloned()
            .ok_or(SetupError::NoAudioStream)?;
        let decoder = demuxer.open_codec(&stream)?;
        Ok(Session {
            stream,
            demuxer: Some(demuxer),
            decoder: Some(decoder),
        })
    }

    /// Start the read loop and the output device.
    ///
    /// Only valid right after a successful `create`. Stale events from a previous session
    /// are discarded first.
    pub fn play(&mut self) -> Result<(), PlayerError> {
        if self.state != PlayerState::Created {
            return Err(PlayerError::InvalidState {
                action: "play",
                state: self.state,
            });
        }
        let Some(session) = self.session.as_mut() else {
            return Err(PlayerError::InvalidState {
                action: "play",
                state: self.state,
            });
        };

        while self.events_rx.try_recv().is_ok() {}

        let requested = OutputFormat::new(
            session.stream.sample_rate.unwrap_or(44_100),
            session.stream.channels.unwrap_or(2),
        );
        let format = match self.output.negotiate(requested) {
            Ok(format) => format,
            Err(e) => {
                self.sink.report(&format!("cannot open audio device: {e}"));
                return Err(e.into());
            }
        };

        let (Some(demuxer), Some(decoder)) = (session.demuxer.take(), session.decoder.take())
        else {
            return Err(PlayerError::InvalidState {
                action: "play",
                state: self.state,
            });
        };
        let stream_index = session.stream.index;

        self.queue.start();
        self.counters = Arc::new(PlaybackCounters::default());

        let stage = DecodeStage::new(
            self.queue.clone(),
            decoder,
            FrameConverter::new(format, self.config.resample_chunk_frames),
            self.sink.clone(),
            self.events_tx.clone(),
        );
        let callback = AudioCallback::new(
            stage,
            self.queue.clone(),
            &self.config,
            self.counters.clone(),
        );

        let reader = ReadLoop::new(
            demuxer,
            self.queue.clone(),
            stream_index,
            &self.config,
            self.sink.clone(),
            self.events_tx.clone(),
        );
        match reader.spawn() {
            Ok(handle) => self.reader = Some(handle),
            Err(e) => {
                self.queue.stop();
                self.state = PlayerState::Stopped;
                self.sink.report(&format!("cannot start read thread: {e}"));
                return Err(PlayerError::Spawn(e));
            }
        }

        let opened = self
            .output
            .open(format, callback)
            .and_then(|()| self.output.start());
        if let Err(e) = opened {
            self.sink.report(&format!("cannot open audio device: {e}"));
            self.teardown();
            self.state = PlayerState::Stopped;
            return Err(e.into());
        }

        self.output_format = Some(format);
        self.state = PlayerState::Playing;
        tracing::info!(
            source = %self.identifier,
            device = %self.output.description(),
            rate_hz = format.sample_rate,
            channels = format.channels,
            resampling = requested.sample_rate != format.sample_rate,
            "playback started"
        );
        let _ = self.events_tx.send(PlayerEvent::Started);
        Ok(())
    }

    /// Stop the session. No-op unless playing.
    pub fn stop(&mut self) {
        if self.state != PlayerState::Playing {
            return;
        }
        self.teardown();
        self.state = PlayerState::Stopped;
        tracing::info!(source = %self.identifier, "playback stopped");
        let _ = self.events_tx.send(PlayerEvent::Stopped);
    }

    /// Stop, then release the source and decoder. Idempotent.
    pub fn destroy(&mut self) {
        if self.state == PlayerState::Destroyed {
            return;
        }
        self.stop();
        self.session = None;
        self.state = PlayerState::Destroyed;
        tracing::debug!(source = %self.identifier, "player destroyed");
    }

    /// Clear `playing`, close the device (dropping the callback and decoder) and join the
    /// read loop.
    fn teardown(&mut self) {
        self.queue.stop();
        if let Err(e) = self.output.stop() {
            tracing::debug!("output stop failed: {e}");
        }
        self.output.close();

        if let Some(handle) = self.reader.take() {
            match handle.join() {
                Ok(demuxer) => {
                    if let Some(session) = self.session.as_mut() {
                        session.demuxer = Some(demuxer);
                    }
                }
                Err(_) => self.sink.report("read thread panicked"),
            }
        }
    }

    /// True while the session is live: playing and not yet stopped, failed or drained.
    pub fn is_playing(&self) -> bool {
        self.state == PlayerState::Playing && self.queue.is_playing()
    }

    /// Receiver for session events. Every clone shares one stream of events.
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.events_rx.clone()
    }

    pub fn status(&self) -> PlayerStatus {
        let source = self.session.as_ref().map(|s| s.stream.clone());
        let duration_ms = source.as_ref().and_then(StreamInfo::duration_ms);
        PlayerStatus {
            identifier: self.identifier.clone(),
            state: self.state,
            playing: self.is_playing(),
            source,
            output: self.output_format,
            queued_bytes: self.queue.size_bytes(),
            queued_packets: self.queue.len(),
            played_bytes: 0,
            elapsed_ms: None,
            duration_ms,
            silence_blocks: 0,
            callbacks: 0,
        }
        .with_counters(&self.counters)
    }
}

impl Drop for MusicPlayer {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        FakeDemuxer, FakeOpener, FakeOutput, OutputLog, RecordingSink, audio_stream,
        other_stream, write_test_wav,
    };
    use std::sync::atomic::Ordering;
    use std::time::{Duration, Instant};

    fn player(
        make: impl Fn() -> FakeDemuxer + Send + Sync + 'static,
        output: FakeOutput,
    ) -> (MusicPlayer, Arc<RecordingSink>, Arc<OutputLog>) {
        let sink = Arc::new(RecordingSink::default());
        let log = output.log();
        let options = PlayerOptions {
            sink: sink.clone(),
            ..PlayerOptions::default()
        };
        let opener = FakeOpener::new(move || Ok(Box::new(make()) as Box<dyn Demuxer>));
        let player = MusicPlayer::with_backends("fake.flac", options, Box::new(opener), Box::new(output));
        (player, sink, log)
    }

    fn endless_stereo() -> FakeDemuxer {
        FakeDemuxer::new(vec![audio_stream(0, 44_100, 2)]).endless(0, 256)
    }

    /// Collect events until `done` returns true or two seconds pass.
    fn events_until(rx: &Receiver<PlayerEvent>, done: impl Fn(&[PlayerEvent]) -> bool) -> Vec<PlayerEvent> {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut seen = Vec::new();
        while !done(&seen) {
            let left = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(left) {
                Ok(ev) => seen.push(ev),
                Err(_) => break,
            }
        }
        seen
    }

    fn wait_for(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() {
            if Instant::now() > deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }

    #[test]
    fn create_play_stop_reports_playing() {
        let (mut p, _sink, log) = player(endless_stereo, FakeOutput::new());
        p.create().unwrap();
        assert_eq!(p.state(), PlayerState::Created);
        assert!(!p.is_playing());

        p.play().unwrap();
        assert!(p.is_playing());
        assert_eq!(log.started.load(Ordering::SeqCst), 1);
        assert!(wait_for(|| log.pumped_bytes.load(Ordering::SeqCst) > 0));
        assert!(wait_for(|| p.status().played_bytes > 0));

        p.stop();
        assert!(!p.is_playing());
        assert_eq!(p.state(), PlayerState::Stopped);
        assert_eq!(log.closed.load(Ordering::SeqCst), 1);
        assert!(!log.pump_running.load(Ordering::SeqCst));

        p.stop();
        assert_eq!(log.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn plays_real_wav_to_the_end() {
        let file = write_test_wav("player", 44_100, 2, 4_410);
        let output = FakeOutput::new();
        let log = output.log();
        let mut p = MusicPlayer::with_backends(
            file.path_str(),
            PlayerOptions::default(),
            Box::new(SymphoniaOpener),
            Box::new(output),
        );

        p.create().unwrap();
        let status = p.status();
        let source = status.source.unwrap();
        assert_eq!(source.sample_rate, Some(44_100));
        assert_eq!(source.channels, Some(2));
        assert_eq!(status.duration_ms, Some(100));

        let events = p.events();
        p.play().unwrap();
        let seen = events_until(&events, |s| s.contains(&PlayerEvent::Finished));
        assert!(seen.contains(&PlayerEvent::Started));
        assert!(seen.contains(&PlayerEvent::Finished));

        assert!(!p.is_playing());
        assert_eq!(p.state(), PlayerState::Playing);
        let status = p.status();
        assert_eq!(status.played_bytes, 4_410 * 4);
        assert_eq!(status.elapsed_ms, Some(100));
        assert_eq!(status.silence_blocks, 0);

        p.stop();
        assert_eq!(log.closed.load(Ordering::SeqCst), 1);
        assert_eq!(p.state(), PlayerState::Stopped);
    }

    #[test]
    fn plays_in_memory_wav_the_requested_number_of_times() {
        let file = write_test_wav("repeat", 44_100, 2, 4_410);
        let bytes = std::fs::read(file.path_str()).unwrap();
        let options = PlayerOptions {
            config: PlaybackConfig {
                play_count: 2,
                ..PlaybackConfig::default()
            },
            ..PlayerOptions::default()
        };
        let mut p = MusicPlayer::with_backends(
            "repeat.wav",
            options,
            Box::new(MemoryOpener::new(bytes)),
            Box::new(FakeOutput::new()),
        );

        p.create().unwrap();
        let events = p.events();
        p.play().unwrap();
        let seen = events_until(&events, |s| {
            s.contains(&PlayerEvent::Finished) && s.contains(&PlayerEvent::SourceExhausted)
        });
        assert!(seen.contains(&PlayerEvent::Finished));
        assert_eq!(
            seen.iter().filter(|e| **e == PlayerEvent::SourceExhausted).count(),
            1
        );

        let status = p.status();
        assert_eq!(status.played_bytes, 2 * 4_410 * 4);
        assert_eq!(status.elapsed_ms, Some(200));
        p.destroy();
    }

    #[test]
    fn missing_audio_stream_fails_create() {
        let (mut p, sink, log) = player(
            || FakeDemuxer::new(vec![other_stream(0)]),
            FakeOutput::new(),
        );
        let err = p.create().unwrap_err();
        assert!(matches!(err, PlayerError::Setup(SetupError::NoAudioStream)));
        assert_eq!(p.state(), PlayerState::Idle);
        assert!(!p.is_playing());
        assert!(sink.messages()[0].contains("cannot find audio stream"));

        assert!(matches!(
            p.play(),
            Err(PlayerError::InvalidState { action: "play", .. })
        ));
        assert_eq!(log.opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsupported_codec_fails_create() {
        let (mut p, sink, _log) = player(
            || {
                let mut stream = audio_stream(0, 44_100, 2);
                stream.codec = Some("unsupported".to_string());
                FakeDemuxer::new(vec![stream])
            },
            FakeOutput::new(),
        );
        assert!(matches!(
            p.create(),
            Err(PlayerError::Setup(SetupError::UnsupportedCodec(_)))
        ));
        assert_eq!(sink.messages().len(), 1);
    }

    #[test]
    fn stop_right_after_play_terminates() {
        let (mut p, _sink, log) = player(endless_stereo, FakeOutput::new());
        for round in 1..=20 {
            p.create().unwrap();
            p.play().unwrap();
            let started = Instant::now();
            p.stop();
            assert!(started.elapsed() < Duration::from_secs(2));
            assert!(!p.is_playing());
            assert_eq!(log.started.load(Ordering::SeqCst), round);
            assert_eq!(log.closed.load(Ordering::SeqCst), round);
            assert!(!log.pump_running.load(Ordering::SeqCst));
        }
    }

    #[test]
    fn double_play_is_rejected() {
        let (mut p, _sink, log) = player(endless_stereo, FakeOutput::new());
        p.create().unwrap();
        p.play().unwrap();

        let err = p.play().unwrap_err();
        assert!(matches!(
            err,
            PlayerError::InvalidState {
                action: "play",
                state: PlayerState::Playing
            }
        ));
        assert_eq!(log.opened.load(Ordering::SeqCst), 1);
        assert!(p.is_playing());
        p.stop();
    }

    #[test]
    fn create_while_playing_is_rejected() {
        let (mut p, _sink, _log) = player(endless_stereo, FakeOutput::new());
        p.create().unwrap();
        p.play().unwrap();
        assert!(matches!(
            p.create(),
            Err(PlayerError::InvalidState { action: "create", .. })
        ));
        p.stop();
    }

    #[test]
    fn destroy_is_idempotent() {
        let (mut p, _sink, log) = player(endless_stereo, FakeOutput::new());
        p.create().unwrap();
        p.play().unwrap();

        p.destroy();
        p.destroy();
        assert_eq!(p.state(), PlayerState::Destroyed);
        assert_eq!(log.closed.load(Ordering::SeqCst), 1);
        assert!(p.status().source.is_none());
        assert!(matches!(
            p.create(),
            Err(PlayerError::InvalidState { action: "create", .. })
        ));
    }

    #[test]
    fn natural_end_emits_events_and_stop_still_closes() {
        let (mut p, _sink, log) = player(
            || FakeDemuxer::new(vec![audio_stream(0, 44_100, 2)]).with_packets(0, 5, 32),
            FakeOutput::new(),
        );
        let events = p.events();
        p.create().unwrap();
        p.play().unwrap();

        let seen = events_until(&events, |s| {
            s.contains(&PlayerEvent::Finished) && s.contains(&PlayerEvent::SourceExhausted)
        });
        assert!(seen.contains(&PlayerEvent::SourceExhausted));
        assert!(seen.contains(&PlayerEvent::Finished));
        assert!(!p.is_playing());
        assert_eq!(p.status().played_bytes, 5 * 32 * 4);

        p.stop();
        assert_eq!(log.closed.load(Ordering::SeqCst), 1);
        assert_eq!(
            events.recv_timeout(Duration::from_secs(1)).unwrap(),
            PlayerEvent::Stopped
        );
    }

    #[test]
    fn replay_after_stop_discards_stale_events() {
        let (mut p, _sink, _log) = player(endless_stereo, FakeOutput::new());
        let events = p.events();
        p.create().unwrap();
        p.play().unwrap();
        p.stop();

        p.create().unwrap();
        p.play().unwrap();
        assert_eq!(
            events.recv_timeout(Duration::from_secs(1)).unwrap(),
            PlayerEvent::Started
        );
        p.stop();
    }

    #[test]
    fn device_failure_stops_session() {
        let (mut p, sink, log) = player(endless_stereo, FakeOutput::new().failing_open());
        p.create().unwrap();
        assert!(matches!(p.play(), Err(PlayerError::Output(_))));
        assert_eq!(p.state(), PlayerState::Stopped);
        assert!(!p.is_playing());
        assert_eq!(log.closed.load(Ordering::SeqCst), 1);
        assert!(sink.messages()[0].contains("audio device"));
    }

    #[test]
    fn status_reports_resampling_to_device_rate() {
        let (mut p, _sink, _log) = player(
            endless_stereo,
            FakeOutput::new().with_format(OutputFormat::new(48_000, 2)),
        );
        p.create().unwrap();
        p.play().unwrap();
        let status = p.status();
        assert_eq!(status.output, Some(OutputFormat::new(48_000, 2)));
        assert_eq!(status.resampling(), Some(true));
        assert!(wait_for(|| p.status().played_bytes > 0));
        p.stop();
    }
}
