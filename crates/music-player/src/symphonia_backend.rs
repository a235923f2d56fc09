//! Symphonia implementation of the source and decoder capabilities.
//!
//! - probe the container from a file path or an in-memory byte buffer (extension used
//!   as hint)
//! - expose tracks as [`StreamInfo`]
//! - hand out raw compressed packets
//! - decode packets into interleaved `f32` frames

use std::fs::File;
use std::io::{self, Cursor, ErrorKind};
use std::path::Path;
use std::sync::Arc;

use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::error::{ReadError, SetupError};
use crate::packet::CompressedPacket;
use crate::source::{
    AudioDecoder, DecodedFrame, Demuxer, ReceiveError, SourceOpener, SourceSampleFormat,
    StreamInfo, StreamKind,
};

/// Opens local files through Symphonia's default probe.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaOpener;

impl SourceOpener for SymphoniaOpener {
    fn open(&self, identifier: &str) -> Result<Box<dyn Demuxer>, SetupError> {
        let file = File::open(identifier)
            .map_err(|e| SetupError::OpenSource(format!("{identifier}: {e}")))?;
        probe(Box::new(file), identifier)
    }
}

/// Opens a container already loaded into memory, such as an entry read out of an
/// archive. The identifier only labels the source; its extension is the probe hint.
#[derive(Clone, Debug)]
pub struct MemoryOpener {
    bytes: Arc<[u8]>,
}

impl MemoryOpener {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

impl SourceOpener for MemoryOpener {
    fn open(&self, identifier: &str) -> Result<Box<dyn Demuxer>, SetupError> {
        if self.bytes.is_empty() {
            return Err(SetupError::OpenSource(format!("{identifier}: no data")));
        }
        probe(Box::new(Cursor::new(self.bytes.clone())), identifier)
    }
}

fn probe(source: Box<dyn MediaSource>, identifier: &str) -> Result<Box<dyn Demuxer>, SetupError> {
    let mut hint = Hint::new();
    if let Some(ext) = Path::new(identifier).extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(source, Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| SetupError::StreamInfo(format!("{identifier}: {e}")))?;

    Ok(Box::new(SymphoniaDemuxer::new(probed.format, identifier)))
}

/// A probed container.
pub struct SymphoniaDemuxer {
    format: Box<dyn FormatReader>,
    streams: Vec<StreamInfo>,
    params: Vec<CodecParameters>,
    label: String,
}

impl SymphoniaDemuxer {
    fn new(format: Box<dyn FormatReader>, label: &str) -> Self {
        let mut streams = Vec::new();
        let mut params = Vec::new();
        for track in format.tracks() {
            streams.push(stream_info_from_params(track.id, &track.codec_params));
            params.push(track.codec_params.clone());
        }
        Self {
            format,
            streams,
            params,
            label: label.to_string(),
        }
    }
}

impl Demuxer for SymphoniaDemuxer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<CompressedPacket, ReadError> {
        match self.format.next_packet() {
            Ok(packet) => Ok(CompressedPacket::new(
                packet.track_id(),
                packet.ts(),
                packet.dur(),
                packet.buf(),
            )),
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                Err(ReadError::EndOfStream)
            }
            Err(SymphoniaError::IoError(e)) => Err(ReadError::Io(e)),
            Err(e) => {
                tracing::debug!(source = %self.label, "read ended: {e}");
                Err(ReadError::EndOfStream)
            }
        }
    }

    fn open_codec(&self, stream: &StreamInfo) -> Result<Box<dyn AudioDecoder>, SetupError> {
        let pos = self
            .streams
            .iter()
            .position(|s| s.index == stream.index)
            .ok_or(SetupError::NoAudioStream)?;
        let params = &self.params[pos];
        let label = stream
            .codec
            .clone()
            .unwrap_or_else(|| format!("codec {}", params.codec));

        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| match e {
                SymphoniaError::Unsupported(_) => SetupError::UnsupportedCodec(label.clone()),
                other => SetupError::CodecOpen(format!("{label}: {other}")),
            })?;

        Ok(Box::new(SymphoniaDecoder {
            decoder,
            track_id: stream.index,
            pending: None,
        }))
    }

    fn rewind(&mut self) -> Result<(), ReadError> {
        self.format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time: Time::new(0, 0.0),
                    track_id: None,
                },
            )
            .map(|_| ())
            .map_err(|e| match e {
                SymphoniaError::IoError(e) => ReadError::Io(e),
                other => ReadError::Io(io::Error::other(format!("{}: {other}", self.label))),
            })
    }

    fn description(&self) -> String {
        self.label.clone()
    }
}

/// Symphonia decodes synchronously, so `send_packet` decodes and parks the frame
/// until `receive_frame` collects it.
pub struct SymphoniaDecoder {
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    pending: Option<DecodedFrame>,
}

impl AudioDecoder for SymphoniaDecoder {
    fn send_packet(&mut self, packet: &CompressedPacket) -> Result<(), String> {
        let packet = Packet::new_from_slice(self.track_id, packet.ts(), packet.dur(), packet.data());
        match self.decoder.decode(&packet).map(frame_from_buffer) {
            Ok(Some(frame)) => {
                self.pending = Some(frame);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(SymphoniaError::ResetRequired) => {
                self.decoder.reset();
                Err("decoder reset required".to_string())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    fn receive_frame(&mut self) -> Result<DecodedFrame, ReceiveError> {
        self.pending.take().ok_or(ReceiveError::NeedMore)
    }
}

/// Copy a decoded buffer out as interleaved `f32`; empty buffers yield nothing.
fn frame_from_buffer(decoded: AudioBufferRef<'_>) -> Option<DecodedFrame> {
    if decoded.frames() == 0 {
        return None;
    }
    let format = sample_format_of(&decoded);
    let spec = *decoded.spec();
    let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
    sample_buf.copy_interleaved_ref(decoded);
    Some(DecodedFrame {
        sample_rate: spec.rate,
        channels: spec.channels.count() as u16,
        format,
        samples: sample_buf.samples().to_vec(),
    })
}

fn sample_format_of(buf: &AudioBufferRef<'_>) -> SourceSampleFormat {
    match buf {
        AudioBufferRef::U8(_) | AudioBufferRef::S8(_) => SourceSampleFormat::U8,
        AudioBufferRef::U16(_) | AudioBufferRef::S16(_) => SourceSampleFormat::S16,
        AudioBufferRef::U24(_) | AudioBufferRef::S24(_) => SourceSampleFormat::S24,
        AudioBufferRef::U32(_) | AudioBufferRef::S32(_) => SourceSampleFormat::S32,
        AudioBufferRef::F32(_) => SourceSampleFormat::F32,
        AudioBufferRef::F64(_) => SourceSampleFormat::F64,
    }
}

fn stream_info_from_params(index: u32, params: &CodecParameters) -> StreamInfo {
    let kind = if params.codec != CODEC_TYPE_NULL && params.sample_rate.is_some() {
        StreamKind::Audio
    } else {
        StreamKind::Other
    };
    StreamInfo {
        index,
        kind,
        codec: codec_name_from_params(params),
        sample_rate: params.sample_rate,
        channels: params.channels.map(|c| c.count() as u16),
        n_frames: params.n_frames,
    }
}

/// Best-effort codec label used for status and diagnostics.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}
