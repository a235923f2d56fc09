//! Streaming audio playback.
//!
//! A read thread demuxes compressed packets into a [`queue::PacketQueue`]; the output
//! device's pull callback decodes and converts them on demand. [`MusicPlayer`] owns the
//! lifecycle.

pub mod config;
pub mod decode;
pub mod device;
pub mod diagnostics;
pub mod error;
pub mod output;
pub mod packet;
pub mod playback;
pub mod player;
pub mod queue;
pub mod read_loop;
pub mod resample;
pub mod source;
pub mod status;
pub mod symphonia_backend;

#[cfg(test)]
mod testing;

pub use config::PlaybackConfig;
pub use diagnostics::{DiagnosticSink, TracingSink};
pub use error::{PlayerError, SetupError};
pub use output::OutputFormat;
pub use player::{MusicPlayer, PlayerEvent, PlayerOptions, PlayerState};
pub use status::PlayerStatus;
