//! Decode stage.
//!
//! Runs synchronously on the device callback thread whenever the converted buffer is
//! drained:
//! - pop the next compressed packet from the [`PacketQueue`] (blocking)
//! - feed it to the decoder and drain every frame it produces
//! - convert each frame to the output format
//!
//! A frame can convert to more bytes than the caller's buffer holds. The surplus is
//! carried over and handed out first on the next call.
//!
//! When the queue drains, the resampler's buffered tail is flushed into the carry and
//! served before `Finished` is sent.

use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::diagnostics::DiagnosticSink;
use crate::error::DecodeError;
use crate::packet::CompressedPacket;
use crate::player::PlayerEvent;
use crate::queue::{PacketQueue, Pop};
use crate::resample::FrameConverter;
use crate::source::{AudioDecoder, ReceiveError};

pub struct DecodeStage {
    queue: Arc<PacketQueue>,
    decoder: Box<dyn AudioDecoder>,
    converter: FrameConverter,
    partial: Option<CompressedPacket>,
    carry: Vec<u8>,
    carry_pos: usize,
    sink: Arc<dyn DiagnosticSink>,
    events: Sender<PlayerEvent>,
    packets_decoded: u64,
    /// The queue drained and the carry holds the flushed resampler tail.
    draining: bool,
}

impl DecodeStage {
    pub fn new(
        queue: Arc<PacketQueue>,
        decoder: Box<dyn AudioDecoder>,
        converter: FrameConverter,
        sink: Arc<dyn DiagnosticSink>,
        events: Sender<PlayerEvent>,
    ) -> Self {
        Self {
            queue,
            decoder,
            converter,
            partial: None,
            carry: Vec::new(),
            carry_pos: 0,
            sink,
            events,
            packets_decoded: 0,
            draining: false,
        }
    }

    pub fn packets_decoded(&self) -> u64 {
        self.packets_decoded
    }

    /// True between a drain that flushed audio and the call that reports end of stream.
    /// The session is no longer playing but the tail still has to be served.
    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Replace the contents of `out` with up to `capacity` converted bytes.
    ///
    /// Never returns `Ok(0)`: packets that decode or convert to nothing are skipped and
    /// the next one is tried. Blocks in [`PacketQueue::pop`] while the queue is empty and
    /// the session is live.
    pub fn decode_next(&mut self, out: &mut Vec<u8>, capacity: usize) -> Result<usize, DecodeError> {
        out.clear();
        if capacity == 0 {
            return Err(DecodeError::Packet("output capacity is zero".to_string()));
        }

        loop {
            if self.carry_pos < self.carry.len() {
                let n = capacity.min(self.carry.len() - self.carry_pos);
                out.extend_from_slice(&self.carry[self.carry_pos..self.carry_pos + n]);
                self.carry_pos += n;
                if self.carry_pos == self.carry.len() {
                    self.carry.clear();
                    self.carry_pos = 0;
                }
                return Ok(n);
            }

            if self.draining {
                self.draining = false;
                let _ = self.events.send(PlayerEvent::Finished);
                return Err(DecodeError::EndOfStream);
            }

            if let Some(packet) = self.partial.take() {
                self.decode_packet(&packet)?;
                continue;
            }

            match self.queue.pop(true) {
                Pop::Packet(packet) => {
                    if !self.queue.is_playing() {
                        return Err(DecodeError::EndOfStream);
                    }
                    self.partial = Some(packet);
                }
                Pop::Drained => {
                    tracing::debug!(packets = self.packets_decoded, "packet queue drained");
                    match self.converter.flush(&mut self.carry) {
                        Ok(n) if n > 0 => {
                            self.draining = true;
                            continue;
                        }
                        Ok(_) => {}
                        Err(e) => self.sink.report(&format!("Error while flushing resampler: {e}")),
                    }
                    let _ = self.events.send(PlayerEvent::Finished);
                    return Err(DecodeError::EndOfStream);
                }
                Pop::Stopped | Pop::WouldBlock => return Err(DecodeError::EndOfStream),
            }
        }
    }

    /// Decode one whole packet into the carry buffer.
    ///
    /// Decoder failures drop the packet and return `Ok`; conversion failures drop the
    /// packet and are returned.
    fn decode_packet(&mut self, packet: &CompressedPacket) -> Result<(), DecodeError> {
        if let Err(e) = self.decoder.send_packet(packet) {
            self.sink
                .report(&format!("Error while decoding packet at ts {}: {e}", packet.ts()));
            return Ok(());
        }
        self.packets_decoded += 1;

        loop {
            match self.decoder.receive_frame() {
                Ok(frame) => {
                    if let Err(e) = self.converter.convert(&frame, &mut self.carry) {
                        self.sink.report(&format!("Error while resampling frame: {e}"));
                        return Err(e.into());
                    }
                }
                Err(ReceiveError::NeedMore) => return Ok(()),
                Err(ReceiveError::Failed(e)) => {
                    self.sink.report(&format!("Error while receiving frame: {e}"));
                    return Ok(());
                }
            }
        }
    }
}
