//! Output device capability.
//!
//! The player opens the device with an [`AudioCallback`] and the device pulls bytes from
//! it on its own thread. Samples are always 16-bit signed, native-endian, interleaved.

use crate::error::OutputError;
use crate::playback::AudioCallback;
use crate::resample::BYTES_PER_SAMPLE;

/// Rate and channel layout of the S16 stream handed to the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl OutputFormat {
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * BYTES_PER_SAMPLE
    }

    /// Duration of `bytes` of output in milliseconds.
    pub fn bytes_to_ms(&self, bytes: u64) -> u64 {
        let per_second = self.bytes_per_frame() as u64 * u64::from(self.sample_rate);
        if per_second == 0 {
            return 0;
        }
        bytes.saturating_mul(1000) / per_second
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} Hz, {} ch, S16", self.sample_rate, self.channels)
    }
}

/// An audio output device driven by a pull callback.
///
/// Lifecycle: `negotiate` → `open` → `start` → (`stop`) → `close`. `close` must not
/// return while the callback may still run, and must drop the callback.
pub trait AudioOutput {
    /// The format the device will actually play for `requested`.
    fn negotiate(&self, requested: OutputFormat) -> Result<OutputFormat, OutputError>;

    fn open(&mut self, format: OutputFormat, callback: AudioCallback) -> Result<(), OutputError>;

    fn start(&mut self) -> Result<(), OutputError>;

    fn stop(&mut self) -> Result<(), OutputError>;

    /// Release the device. Idempotent.
    fn close(&mut self);

    fn description(&self) -> String {
        "output".to_string()
    }
}
