//! Playback buffer cursor and the device pull callback.
//!
//! The device calls [`AudioCallback::fill`] on its own thread with the byte slice it
//! needs. The callback:
//! - serves bytes from the current [`ConvertedBuffer`]
//! - refills the buffer through [`DecodeStage::decode_next`] when it is exhausted
//! - substitutes a block of silence when decoding fails
//!
//! Errors never leave the callback; whatever it cannot fill is zeroed.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::config::PlaybackConfig;
use crate::decode::DecodeStage;
use crate::error::DecodeError;
use crate::queue::PacketQueue;
use crate::status::PlaybackCounters;

/// Fixed-capacity byte buffer of converted samples plus a read cursor.
///
/// `index <= size <= capacity` holds after every operation.
pub struct ConvertedBuffer {
    buf: Vec<u8>,
    index: usize,
    capacity: usize,
    silence: bool,
}

impl ConvertedBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            index: 0,
            capacity,
            silence: false,
        }
    }

    /// Valid bytes in the buffer.
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Next unread offset.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_exhausted(&self) -> bool {
        self.index >= self.buf.len()
    }

    /// Whether the current contents are substituted silence.
    pub fn is_silence(&self) -> bool {
        self.silence
    }

    /// Refill from the decode stage and rewind the cursor.
    pub fn refill(&mut self, stage: &mut DecodeStage) -> Result<usize, DecodeError> {
        self.index = 0;
        self.silence = false;
        match stage.decode_next(&mut self.buf, self.capacity) {
            Ok(n) => {
                self.buf.truncate(self.capacity);
                Ok(n.min(self.capacity))
            }
            Err(e) => {
                self.buf.clear();
                Err(e)
            }
        }
    }

    /// Replace the contents with `len` zero bytes (clamped to capacity).
    pub fn fill_silence(&mut self, len: usize) {
        self.buf.clear();
        self.buf.resize(len.min(self.capacity), 0);
        self.index = 0;
        self.silence = true;
    }

    /// Copy unread bytes into `out` and advance the cursor. Returns the bytes copied.
    pub fn copy_into(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.buf.len() - self.index);
        out[..n].copy_from_slice(&self.buf[self.index..self.index + n]);
        self.index += n;
        n
    }
}

/// The pull callback bound to one playback session.
pub struct AudioCallback {
    stage: DecodeStage,
    buffer: ConvertedBuffer,
    queue: Arc<PacketQueue>,
    silence_block: usize,
    counters: Arc<PlaybackCounters>,
}

impl AudioCallback {
    pub fn new(
        stage: DecodeStage,
        queue: Arc<PacketQueue>,
        config: &PlaybackConfig,
        counters: Arc<PlaybackCounters>,
    ) -> Self {
        let capacity = config.buffer_capacity_bytes.max(1);
        Self {
            stage,
            buffer: ConvertedBuffer::new(capacity),
            queue,
            silence_block: config.silence_block_bytes.max(1),
            counters,
        }
    }

    /// Fill `out` completely. Bytes that cannot be served while playing are zeroed.
    ///
    /// A drained session keeps serving until the flushed resampler tail is played out.
    pub fn fill(&mut self, out: &mut [u8]) {
        self.counters.callbacks.fetch_add(1, Ordering::Relaxed);

        let mut written = 0usize;
        while written < out.len() && (self.queue.is_playing() || self.stage.is_draining()) {
            if self.buffer.is_exhausted() {
                match self.buffer.refill(&mut self.stage) {
                    Ok(n) if n > 0 => {}
                    Ok(_) => self.substitute_silence(),
                    Err(DecodeError::EndOfStream) => {
                        self.buffer.fill_silence(self.silence_block);
                    }
                    Err(e) => {
                        tracing::debug!("decode failed in callback: {e}");
                        self.substitute_silence();
                    }
                }
            }

            let n = self.buffer.copy_into(&mut out[written..]);
            if !self.buffer.is_silence() {
                self.counters
                    .played_bytes
                    .fetch_add(n as u64, Ordering::Relaxed);
            }
            written += n;
        }

        out[written..].fill(0);
    }

    fn substitute_silence(&mut self) {
        self.buffer.fill_silence(self.silence_block);
        self.counters.silence_blocks.fetch_add(1, Ordering::Relaxed);
    }
}
