//! Demux/read loop.
//!
//! One thread per playback session pulls compressed packets from the source and queues
//! those belonging to the audio stream. It:
//! - pauses while the queue holds more than `max_queue_bytes` (backpressure)
//! - rewinds the source at end of stream while `play_count` asks for another pass
//! - marks the queue finished at end of stream and waits for the session to stop
//! - stops the session on a genuine I/O error
//!
//! The thread hands the demuxer back through its join handle so the player releases it.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::config::PlaybackConfig;
use crate::diagnostics::DiagnosticSink;
use crate::error::ReadError;
use crate::player::PlayerEvent;
use crate::queue::PacketQueue;
use crate::source::Demuxer;

pub struct ReadLoop {
    demuxer: Box<dyn Demuxer>,
    queue: Arc<PacketQueue>,
    audio_stream: u32,
    max_queue_bytes: usize,
    poll: Duration,
    config: PlaybackConfig,
    sink: Arc<dyn DiagnosticSink>,
    events: Sender<PlayerEvent>,
}

impl ReadLoop {
    pub fn new(
        demuxer: Box<dyn Demuxer>,
        queue: Arc<PacketQueue>,
        audio_stream: u32,
        config: &PlaybackConfig,
        sink: Arc<dyn DiagnosticSink>,
        events: Sender<PlayerEvent>,
    ) -> Self {
        Self {
            demuxer,
            queue,
            audio_stream,
            max_queue_bytes: config.max_queue_bytes,
            poll: config.backpressure_poll(),
            config: config.clone(),
            sink,
            events,
        }
    }

    /// Run the loop on a named thread.
    pub fn spawn(self) -> io::Result<JoinHandle<Box<dyn Demuxer>>> {
        thread::Builder::new()
            .name("music-read".to_string())
            .spawn(move || self.run())
    }

    /// Run until the session stops. Returns the demuxer.
    pub fn run(mut self) -> Box<dyn Demuxer> {
        let source = self.demuxer.description();
        let mut queued = 0u64;
        let mut dropped = 0u64;
        let mut passes = 1u32;
        let mut queued_at_pass = 0u64;

        loop {
            if !self.queue.is_playing() {
                self.queue.wake_all();
                break;
            }

            if self.queue.size_bytes() > self.max_queue_bytes {
                thread::sleep(self.poll);
                continue;
            }

            match self.demuxer.read_packet() {
                Ok(packet) if packet.stream_index() == self.audio_stream => {
                    if let Err(e) = self.queue.push(&packet) {
                        self.sink.report(&format!("{source}: {e}"));
                        self.queue.stop();
                        let _ = self.events.send(PlayerEvent::Failed(e.to_string()));
                        break;
                    }
                    queued += 1;
                }
                Ok(_) => dropped += 1,
                // A pass that queued nothing would rewind forever.
                Err(ReadError::EndOfStream)
                    if self.config.plays_again(passes) && queued > queued_at_pass =>
                {
                    match self.demuxer.rewind() {
                        Ok(()) => {
                            passes = passes.saturating_add(1);
                            queued_at_pass = queued;
                            tracing::debug!(%source, pass = passes, "source rewound");
                            continue;
                        }
                        Err(e) => {
                            self.sink.report(&format!("{source}: cannot repeat: {e}"));
                            self.finish(&source, queued, dropped);
                        }
                    }
                }
                Err(ReadError::EndOfStream) => self.finish(&source, queued, dropped),
                Err(ReadError::Io(e)) => {
                    self.sink.report(&format!("{source}: read error: {e}"));
                    self.queue.stop();
                    let _ = self.events.send(PlayerEvent::Failed(e.to_string()));
                    break;
                }
            }
        }

        tracing::debug!(%source, queued, dropped, "read loop exited");
        self.demuxer
    }

    /// Mark the queue finished and park until the session stops.
    fn finish(&self, source: &str, queued: u64, dropped: u64) {
        tracing::debug!(%source, queued, dropped, "source exhausted");
        self.queue.finish();
        let _ = self.events.send(PlayerEvent::SourceExhausted);
        self.queue.wait_until_stopped();
    }
}
