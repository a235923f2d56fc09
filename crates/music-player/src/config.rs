use std::time::Duration;

use serde::Deserialize;

/// Playback tuning parameters shared by the read loop, decode stage and callback.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Backpressure ceiling: the read loop pauses while the packet queue holds more bytes.
    pub max_queue_bytes: usize,
    /// Read loop sleep while the queue is over the ceiling.
    pub backpressure_poll_ms: u64,
    /// Capacity of the converted sample buffer handed to the device callback.
    pub buffer_capacity_bytes: usize,
    /// Bytes of silence substituted when decoding fails inside the callback.
    pub silence_block_bytes: usize,
    /// Requested hardware period in frames.
    pub device_buffer_frames: u32,
    /// Resampler input chunk size in frames.
    pub resample_chunk_frames: usize,
    /// Times the source is played back to back; 0 repeats until stopped.
    pub play_count: u32,
}

impl Default for PlaybackConfig {
    /// Defaults sized for one stereo stream of compressed music.
    fn default() -> Self {
        Self {
            max_queue_bytes: 5 * 16 * 1024,
            backpressure_poll_ms: 10,
            buffer_capacity_bytes: (192_000 * 3) / 2,
            silence_block_bytes: 1024,
            device_buffer_frames: 4096,
            resample_chunk_frames: 1024,
            play_count: 1,
        }
    }
}

impl PlaybackConfig {
    pub fn backpressure_poll(&self) -> Duration {
        Duration::from_millis(self.backpressure_poll_ms.max(1))
    }

    /// Whether another pass follows the `completed` passes played so far.
    pub fn plays_again(&self, completed: u32) -> bool {
        self.play_count == 0 || completed < self.play_count
    }
}
