//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::diagnostics::DiagnosticSink;
use crate::error::{OutputError, ReadError, SetupError};
use crate::output::{AudioOutput, OutputFormat};
use crate::packet::CompressedPacket;
use crate::playback::AudioCallback;
use crate::source::{
    AudioDecoder, DecodedFrame, Demuxer, ReceiveError, SourceOpener, SourceSampleFormat,
    StreamInfo, StreamKind,
};

/// Payloads starting with this byte fail in [`FakeDecoder::send_packet`].
pub const BAD_PACKET: u8 = 0xFF;

pub fn audio_stream(index: u32, rate: u32, channels: u16) -> StreamInfo {
    StreamInfo {
        index,
        kind: StreamKind::Audio,
        codec: Some("PCM_S16".to_string()),
        sample_rate: Some(rate),
        channels: Some(channels),
        n_frames: None,
    }
}

pub fn other_stream(index: u32) -> StreamInfo {
    StreamInfo {
        index,
        kind: StreamKind::Other,
        codec: None,
        sample_rate: None,
        channels: None,
        n_frames: None,
    }
}

/// Decodes each packet into one frame with one sample frame per payload byte.
pub struct FakeDecoder {
    rate: u32,
    channels: u16,
    pending: VecDeque<DecodedFrame>,
}

impl FakeDecoder {
    pub fn new(rate: u32, channels: u16) -> Self {
        Self {
            rate,
            channels,
            pending: VecDeque::new(),
        }
    }
}

impl AudioDecoder for FakeDecoder {
    fn send_packet(&mut self, packet: &CompressedPacket) -> Result<(), String> {
        if packet.data().first() == Some(&BAD_PACKET) {
            return Err("corrupt packet".to_string());
        }
        self.pending.push_back(DecodedFrame {
            sample_rate: self.rate,
            channels: self.channels,
            format: SourceSampleFormat::S16,
            samples: vec![0.25; packet.len() * self.channels as usize],
        });
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<DecodedFrame, ReceiveError> {
        self.pending.pop_front().ok_or(ReceiveError::NeedMore)
    }
}

/// Scripted demuxer: plays back queued results, then either repeats a packet forever or
/// reports end of stream.
pub struct FakeDemuxer {
    streams: Vec<StreamInfo>,
    script: VecDeque<Result<CompressedPacket, ReadError>>,
    /// Scripted packets, replayed by `rewind`.
    recorded: Vec<CompressedPacket>,
    rewindable: bool,
    endless: Option<CompressedPacket>,
    reads: Arc<AtomicUsize>,
    rewinds: Arc<AtomicUsize>,
    ts: u64,
}

impl FakeDemuxer {
    pub fn new(streams: Vec<StreamInfo>) -> Self {
        Self {
            streams,
            script: VecDeque::new(),
            recorded: Vec::new(),
            rewindable: true,
            endless: None,
            reads: Arc::new(AtomicUsize::new(0)),
            rewinds: Arc::new(AtomicUsize::new(0)),
            ts: 0,
        }
    }

    pub fn with_packet(mut self, stream_index: u32, payload: Vec<u8>) -> Self {
        let ts = self.script.len() as u64;
        let packet = CompressedPacket::new(stream_index, ts, 1, payload);
        self.recorded.push(packet.clone());
        self.script.push_back(Ok(packet));
        self
    }

    /// Make `rewind` fail like a non-seekable stream.
    pub fn without_rewind(mut self) -> Self {
        self.rewindable = false;
        self
    }

    pub fn with_packets(mut self, stream_index: u32, count: usize, len: usize) -> Self {
        for _ in 0..count {
            self = self.with_packet(stream_index, vec![1; len]);
        }
        self
    }

    pub fn with_io_error(mut self) -> Self {
        self.script.push_back(Err(ReadError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk on fire",
        ))));
        self
    }

    /// After the script, produce `len`-byte packets on `stream_index` forever.
    pub fn endless(mut self, stream_index: u32, len: usize) -> Self {
        self.endless = Some(CompressedPacket::new(stream_index, 0, 1, vec![1; len]));
        self
    }

    /// Number of `read_packet` calls so far.
    pub fn reads(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }

    /// Number of successful `rewind` calls so far.
    pub fn rewinds(&self) -> Arc<AtomicUsize> {
        self.rewinds.clone()
    }
}

impl Demuxer for FakeDemuxer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<CompressedPacket, ReadError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self.script.pop_front() {
            return next;
        }
        match &self.endless {
            Some(template) => {
                self.ts += 1;
                Ok(CompressedPacket::new(
                    template.stream_index(),
                    self.ts,
                    1,
                    template.data().to_vec(),
                ))
            }
            None => Err(ReadError::EndOfStream),
        }
    }

    fn open_codec(&self, stream: &StreamInfo) -> Result<Box<dyn AudioDecoder>, SetupError> {
        match stream.codec.as_deref() {
            Some("unsupported") => Err(SetupError::UnsupportedCodec("unsupported".to_string())),
            Some("broken") => Err(SetupError::CodecOpen("broken".to_string())),
            _ => Ok(Box::new(FakeDecoder::new(
                stream.sample_rate.unwrap_or(0),
                stream.channels.unwrap_or(0),
            ))),
        }
    }

    fn rewind(&mut self) -> Result<(), ReadError> {
        if !self.rewindable {
            return Err(ReadError::Io(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "fake stream is not seekable",
            )));
        }
        self.script = self.recorded.iter().cloned().map(Ok).collect();
        self.rewinds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn description(&self) -> String {
        "fake".to_string()
    }
}

type OpenFn = dyn Fn() -> Result<Box<dyn Demuxer>, SetupError> + Send + Sync;

/// Opener that ignores the identifier and builds a fresh demuxer per call.
pub struct FakeOpener {
    make: Box<OpenFn>,
}

impl FakeOpener {
    pub fn new(
        make: impl Fn() -> Result<Box<dyn Demuxer>, SetupError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            make: Box::new(make),
        }
    }
}

impl SourceOpener for FakeOpener {
    fn open(&self, _identifier: &str) -> Result<Box<dyn Demuxer>, SetupError> {
        (self.make)()
    }
}

/// Collects reported diagnostics.
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

impl DiagnosticSink for RecordingSink {
    fn report(&self, message: &str) {
        if let Ok(mut m) = self.messages.lock() {
            m.push(message.to_string());
        }
    }
}

/// What a [`FakeOutput`] observed.
#[derive(Debug, Default)]
pub struct OutputLog {
    pub opened: AtomicUsize,
    pub started: AtomicUsize,
    pub closed: AtomicUsize,
    pub pumped_bytes: AtomicU64,
    pub pump_running: AtomicBool,
}

/// Output device that pumps the callback from its own thread, like a sound card would.
pub struct FakeOutput {
    device_format: Option<OutputFormat>,
    fail_open: bool,
    period_bytes: usize,
    callback: Option<AudioCallback>,
    pump: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
    log: Arc<OutputLog>,
}

impl FakeOutput {
    pub fn new() -> Self {
        Self {
            device_format: None,
            fail_open: false,
            period_bytes: 4096,
            callback: None,
            pump: None,
            log: Arc::new(OutputLog::default()),
        }
    }

    /// Negotiate to this format regardless of the request.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.device_format = Some(format);
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn log(&self) -> Arc<OutputLog> {
        self.log.clone()
    }
}

impl AudioOutput for FakeOutput {
    fn negotiate(&self, requested: OutputFormat) -> Result<OutputFormat, OutputError> {
        Ok(self.device_format.unwrap_or(requested))
    }

    fn open(&mut self, _format: OutputFormat, callback: AudioCallback) -> Result<(), OutputError> {
        if self.fail_open {
            return Err(OutputError::Build("fake device refused".to_string()));
        }
        self.log.opened.fetch_add(1, Ordering::SeqCst);
        self.callback = Some(callback);
        Ok(())
    }

    fn start(&mut self) -> Result<(), OutputError> {
        let Some(mut callback) = self.callback.take() else {
            return Err(OutputError::NotOpen);
        };
        self.log.started.fetch_add(1, Ordering::SeqCst);

        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let log = self.log.clone();
        let period = self.period_bytes;
        let handle = thread::spawn(move || {
            log.pump_running.store(true, Ordering::SeqCst);
            let mut buf = vec![0u8; period];
            while !flag.load(Ordering::SeqCst) {
                callback.fill(&mut buf);
                log.pumped_bytes.fetch_add(buf.len() as u64, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(1));
            }
            log.pump_running.store(false, Ordering::SeqCst);
        });
        self.pump = Some((shutdown, handle));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), OutputError> {
        Ok(())
    }

    fn close(&mut self) {
        self.callback = None;
        if let Some((shutdown, handle)) = self.pump.take() {
            shutdown.store(true, Ordering::SeqCst);
            let _ = handle.join();
        }
        self.log.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn description(&self) -> String {
        "fake output".to_string()
    }
}

/// A file in the temp directory, removed on drop.
pub struct TempFile {
    path: PathBuf,
}

impl TempFile {
    pub fn with_bytes(name: &str, bytes: &[u8]) -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let n = NEXT.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "music-player-{}-{n}-{name}",
            std::process::id()
        ));
        std::fs::write(&path, bytes).unwrap();
        Self { path }
    }

    pub fn path_str(&self) -> &str {
        self.path.to_str().unwrap()
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Write a 16-bit PCM WAV holding a 440 Hz sine.
pub fn write_test_wav(name: &str, rate: u32, channels: u16, frames: u32) -> TempFile {
    let block_align = channels * 2;
    let data_len = frames * u32::from(block_align);

    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&channels.to_le_bytes());
    bytes.extend_from_slice(&rate.to_le_bytes());
    bytes.extend_from_slice(&(rate * u32::from(block_align)).to_le_bytes());
    bytes.extend_from_slice(&block_align.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());

    for i in 0..frames {
        let t = i as f32 / rate as f32;
        let v = ((2.0 * PI * 440.0 * t).sin() * 0.5 * i16::MAX as f32) as i16;
        for _ in 0..channels {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
    }

    TempFile::with_bytes(&format!("{name}.wav"), &bytes)
}
