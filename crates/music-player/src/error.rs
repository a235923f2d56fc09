//! Error types for the playback pipeline.
//!
//! Each stage gets its own enum so callers can tell setup failures, transient
//! per-packet failures and fatal I/O apart without string matching.

use thiserror::Error;

/// Failures while preparing a session in `MusicPlayer::create`.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("file open error: {0}")]
    OpenSource(String),

    #[error("cannot find stream information: {0}")]
    StreamInfo(String),

    #[error("cannot find audio stream")]
    NoAudioStream,

    #[error("cannot find audio decoder for {0}")]
    UnsupportedCodec(String),

    #[error("cannot open codec: {0}")]
    CodecOpen(String),
}

/// Failures pushing into the packet queue.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("out of memory while queueing packet")]
    OutOfMemory,
}

/// Result of a failed `Demuxer::read_packet`.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The source has no more packets; not an I/O failure.
    #[error("end of stream")]
    EndOfStream,

    #[error("source read error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures from the frame converter.
#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),

    #[error("resampler init error: {0}")]
    Init(String),

    #[error("resampler process error: {0}")]
    Process(String),
}

/// Failures returned by the decode stage to the audio callback.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Playback stopped or the drained queue reported end of stream.
    #[error("end of stream")]
    EndOfStream,

    #[error("packet decode error: {0}")]
    Packet(String),

    #[error(transparent)]
    Resample(#[from] ResampleError),
}

/// Failures from an output device backend.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("no output device: {0}")]
    NoDevice(String),

    #[error("unsupported output config: {0}")]
    UnsupportedConfig(String),

    #[error("failed to build output stream: {0}")]
    Build(String),

    #[error("failed to start output stream: {0}")]
    Start(String),

    #[error("output stream is not open")]
    NotOpen,
}

/// Errors surfaced by the player lifecycle.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("cannot {action} while player is {state}")]
    InvalidState {
        action: &'static str,
        state: crate::player::PlayerState,
    },

    #[error("failed to spawn read thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
