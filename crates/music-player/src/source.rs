//! Capabilities the pipeline consumes from a container/codec library.
//!
//! The player only talks to these traits; [`crate::symphonia_backend`] is the
//! production implementation. Closing a handle is dropping it.

use std::io;

use crate::error::{ReadError, SetupError};
use crate::packet::CompressedPacket;

/// What a demuxed stream carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Audio,
    Other,
}

/// Stream description reported by [`Demuxer::streams`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamInfo {
    pub index: u32,
    pub kind: StreamKind,
    /// Codec label (best-effort).
    pub codec: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    /// Total frames when the container reports it.
    pub n_frames: Option<u64>,
}

impl StreamInfo {
    /// Best-effort duration in milliseconds.
    pub fn duration_ms(&self) -> Option<u64> {
        let frames = self.n_frames?;
        let rate = u64::from(self.sample_rate?);
        if rate == 0 {
            return None;
        }
        Some(frames.saturating_mul(1000) / rate)
    }
}

/// Sample representation the decoder produced before conversion to `f32`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceSampleFormat {
    U8,
    S16,
    S24,
    S32,
    F32,
    F64,
}

/// One decoded frame: interleaved `f32` samples plus their native layout.
///
/// Frames are transient; the converter consumes them and they are not retained.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedFrame {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SourceSampleFormat,
    pub samples: Vec<f32>,
}

impl DecodedFrame {
    /// Samples per channel.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

/// Outcome of [`AudioDecoder::receive_frame`] when no frame is returned.
#[derive(Debug, PartialEq, Eq)]
pub enum ReceiveError {
    /// The decoder needs another packet before it can emit a frame.
    NeedMore,
    Failed(String),
}

/// An opened codec for one stream.
pub trait AudioDecoder: Send {
    /// Feed one compressed packet. Errors are per packet and not fatal to the decoder.
    fn send_packet(&mut self, packet: &CompressedPacket) -> Result<(), String>;

    /// Pull the next decoded frame produced by previously sent packets.
    fn receive_frame(&mut self) -> Result<DecodedFrame, ReceiveError>;
}

/// An opened container.
pub trait Demuxer: Send {
    /// Streams discovered while opening the source.
    fn streams(&self) -> &[StreamInfo];

    /// Read the next compressed packet from any stream.
    fn read_packet(&mut self) -> Result<CompressedPacket, ReadError>;

    /// Open a decoder for one of this source's streams.
    fn open_codec(&self, stream: &StreamInfo) -> Result<Box<dyn AudioDecoder>, SetupError>;

    /// Seek back to the first packet so the source can be played again.
    fn rewind(&mut self) -> Result<(), ReadError> {
        Err(ReadError::Io(io::Error::new(
            io::ErrorKind::Unsupported,
            "source cannot rewind",
        )))
    }

    /// Short label for logs.
    fn description(&self) -> String {
        "source".to_string()
    }
}

/// Opens a source by identifier (a path for the file backend).
pub trait SourceOpener: Send + Sync {
    fn open(&self, identifier: &str) -> Result<Box<dyn Demuxer>, SetupError>;
}

/// First audio stream in container order.
pub fn find_audio_stream(streams: &[StreamInfo]) -> Option<&StreamInfo> {
    streams.iter().find(|s| s.kind == StreamKind::Audio)
}
