//! Frame conversion to the device format.
//!
//! Decoded frames arrive as interleaved `f32` at the source rate and channel layout.
//! [`FrameConverter`] maps channels, resamples with Rubato when the rates differ, and
//! writes 16-bit signed native-endian interleaved bytes.
//!
//! Rubato consumes fixed input chunks, so input that does not fill a whole chunk stays
//! buffered in the converter until the next frame arrives. That buffered input is the
//! delay accounted for by [`scratch_frames`]. [`FrameConverter::flush`] pushes it, and the
//! filter delay, through as a zero-padded partial chunk at end of stream.

use audioadapter_buffers::direct::InterleavedSlice;
use cpal::Sample;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::error::ResampleError;
use crate::output::OutputFormat;
use crate::source::{DecodedFrame, SourceSampleFormat};

/// Output sample width in bytes (S16).
pub const BYTES_PER_SAMPLE: usize = 2;

/// `frames * dst_rate / src_rate`, rounded up.
pub fn rescale_up(frames: usize, dst_rate: u32, src_rate: u32) -> usize {
    if src_rate == 0 {
        return 0;
    }
    let num = frames as u128 * u128::from(dst_rate);
    num.div_ceil(u128::from(src_rate)) as usize
}

/// Output frames to reserve for `in_frames` new input frames while `delay_frames` are
/// still buffered: the larger of the plain estimate and the delay-compensated one.
pub fn scratch_frames(in_frames: usize, delay_frames: usize, src_rate: u32, dst_rate: u32) -> usize {
    let estimate = rescale_up(in_frames, dst_rate, src_rate);
    let with_delay = rescale_up(delay_frames + in_frames, dst_rate, src_rate);
    estimate.max(with_delay)
}

/// Converts decoded frames into S16 bytes for one [`OutputFormat`].
pub struct FrameConverter {
    target: OutputFormat,
    chunk_frames: usize,
    stage: Option<ResampleStage>,
    mapped: Vec<f32>,
    source: Option<SourceLayout>,
}

/// Layout of the most recent input frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceLayout {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SourceSampleFormat,
}

impl FrameConverter {
    pub fn new(target: OutputFormat, chunk_frames: usize) -> Self {
        Self {
            target,
            chunk_frames: chunk_frames.max(1),
            stage: None,
            mapped: Vec::new(),
            source: None,
        }
    }

    /// Layout of the last frame converted, if any.
    pub fn source_layout(&self) -> Option<SourceLayout> {
        self.source
    }

    pub fn target(&self) -> OutputFormat {
        self.target
    }

    /// Input frames held back waiting for a full resampler chunk.
    pub fn pending_frames(&self) -> usize {
        self.stage
            .as_ref()
            .map(|s| s.pending.len() / self.target.channels as usize)
            .unwrap_or(0)
    }

    /// Append the converted bytes for `frame` to `out` and return how many were written.
    ///
    /// May return `Ok(0)` while the resampler is still filling its first chunk.
    pub fn convert(&mut self, frame: &DecodedFrame, out: &mut Vec<u8>) -> Result<usize, ResampleError> {
        if frame.sample_rate == 0 {
            return Err(ResampleError::InvalidFrame("sample rate is zero"));
        }
        if frame.channels == 0 {
            return Err(ResampleError::InvalidFrame("no channels"));
        }
        if frame.frames() == 0 {
            return Err(ResampleError::InvalidFrame("no samples"));
        }
        if self.target.channels == 0 || self.target.sample_rate == 0 {
            return Err(ResampleError::Init("output format is empty".to_string()));
        }

        let layout = SourceLayout {
            sample_rate: frame.sample_rate,
            channels: frame.channels,
            format: frame.format,
        };
        if self.source != Some(layout) {
            tracing::debug!(
                rate_hz = layout.sample_rate,
                channels = layout.channels,
                format = ?layout.format,
                target = %self.target,
                "source frame layout"
            );
            self.source = Some(layout);
        }

        let dst_channels = self.target.channels as usize;
        map_channels(
            &frame.samples,
            frame.channels as usize,
            dst_channels,
            &mut self.mapped,
        );

        let start = out.len();
        if frame.sample_rate == self.target.sample_rate {
            if self.stage.is_some() {
                let flushed = self.flush(out)?;
                tracing::debug!(flushed, "source rate now matches output; resampler dropped");
            }
            out.reserve(self.mapped.len() * BYTES_PER_SAMPLE);
            write_s16(&self.mapped, out);
            return Ok(out.len() - start);
        }

        let rebuild = self
            .stage
            .as_ref()
            .map(|s| s.src_rate != frame.sample_rate)
            .unwrap_or(true);
        if rebuild {
            self.flush(out)?;
            self.stage = Some(ResampleStage::new(
                frame.sample_rate,
                self.target,
                self.chunk_frames,
            )?);
            tracing::debug!(
                from_hz = frame.sample_rate,
                to_hz = self.target.sample_rate,
                "resampler initialized"
            );
        }

        match self.stage.as_mut() {
            Some(stage) => {
                stage.process(&self.mapped, out)?;
                Ok(out.len() - start)
            }
            None => Err(ResampleError::Init("resampler missing".to_string())),
        }
    }

    /// Drain the resampler: buffered input plus the filter delay, appended to `out`.
    ///
    /// Returns the bytes written; `Ok(0)` when nothing is buffered. The next resampled
    /// frame starts a fresh resampler.
    pub fn flush(&mut self, out: &mut Vec<u8>) -> Result<usize, ResampleError> {
        match self.stage.take() {
            Some(stage) => stage.flush(out),
            None => Ok(0),
        }
    }
}

struct ResampleStage {
    src_rate: u32,
    dst_rate: u32,
    channels: usize,
    chunk_frames: usize,
    resampler: Async<f32>,
    indexing: Indexing,
    pending: Vec<f32>,
    scratch: Vec<f32>,
    /// Input frames handed to Rubato in whole chunks.
    frames_in: usize,
    /// Output frames written so far.
    frames_out: usize,
}

impl ResampleStage {
    fn new(src_rate: u32, target: OutputFormat, chunk_frames: usize) -> Result<Self, ResampleError> {
        let channels = target.channels as usize;
        let f_ratio = target.sample_rate as f64 / src_rate as f64;

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let resampler = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| ResampleError::Init(e.to_string()))?;

        // One chunk of delay on top of the chunk itself bounds a single process call.
        let scratch_len =
            scratch_frames(chunk_frames, chunk_frames, src_rate, target.sample_rate) * channels;

        Ok(Self {
            src_rate,
            dst_rate: target.sample_rate,
            channels,
            chunk_frames,
            resampler,
            indexing: Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: None,
            },
            pending: Vec::new(),
            scratch: vec![0.0; scratch_len],
            frames_in: 0,
            frames_out: 0,
        })
    }

    fn process(&mut self, mapped: &[f32], out: &mut Vec<u8>) -> Result<usize, ResampleError> {
        let channels = self.channels;
        let delay_frames = self.pending.len() / channels;
        let in_frames = mapped.len() / channels;

        let reserve = scratch_frames(in_frames, delay_frames, self.src_rate, self.dst_rate);
        out.reserve(reserve * channels * BYTES_PER_SAMPLE);
        self.pending.extend_from_slice(mapped);

        let start = out.len();
        let mut offset = 0;
        while self.pending.len() / channels - offset >= self.chunk_frames {
            let produced = self.run_chunk(offset, None)?;
            write_s16(&self.scratch[..produced * channels], out);
            self.frames_in += self.chunk_frames;
            self.frames_out += produced;
            offset += self.chunk_frames;
        }

        self.pending.drain(..offset * channels);
        Ok(out.len() - start)
    }

    /// Resample the buffered tail as a partial chunk, then feed silence until the output
    /// covers every input frame plus the filter delay.
    fn flush(mut self, out: &mut Vec<u8>) -> Result<usize, ResampleError> {
        let channels = self.channels;
        let tail_frames = self.pending.len() / channels;
        let total_in = self.frames_in + tail_frames;
        if total_in == 0 {
            return Ok(0);
        }

        let delay = self.resampler.output_delay();
        let wanted = rescale_up(total_in, self.dst_rate, self.src_rate) + delay;
        let max_passes = 2 + rescale_up(delay, self.src_rate, self.dst_rate).div_ceil(self.chunk_frames);

        self.pending.resize(self.chunk_frames * channels, 0.0);
        let start = out.len();
        let mut partial_len = Some(tail_frames);
        for _ in 0..max_passes {
            if self.frames_out >= wanted {
                break;
            }
            let produced = self.run_chunk(0, partial_len)?;
            let keep = produced.min(wanted - self.frames_out);
            write_s16(&self.scratch[..keep * channels], out);
            self.frames_out += keep;
            if produced == 0 {
                break;
            }
            if partial_len.take().is_some() {
                self.pending.fill(0.0);
            }
        }

        tracing::debug!(
            tail_frames,
            out_frames = (out.len() - start) / (channels * BYTES_PER_SAMPLE),
            "resampler flushed"
        );
        Ok(out.len() - start)
    }

    /// Run one chunk starting `offset` frames into `pending`. Returns output frames in
    /// `scratch`.
    fn run_chunk(&mut self, offset: usize, partial_len: Option<usize>) -> Result<usize, ResampleError> {
        let channels = self.channels;
        let input_adapter = InterleavedSlice::new(&self.pending, channels, self.pending.len() / channels)
            .map_err(|e| ResampleError::Process(format!("input slice: {e}")))?;

        let out_capacity_frames = self.scratch.len() / channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut self.scratch, channels, out_capacity_frames)
                .map_err(|e| ResampleError::Process(format!("output slice: {e}")))?;

        self.indexing.input_offset = offset;
        self.indexing.output_offset = 0;
        self.indexing.partial_len = partial_len;

        let (_nbr_in, nbr_out) = self
            .resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&self.indexing))
            .map_err(|e| ResampleError::Process(e.to_string()))?;
        Ok(nbr_out)
    }
}

/// Map interleaved samples between channel counts.
///
/// - mono → N: duplicate channel 0
/// - stereo → mono: average L/R
/// - fewer → more: cycle through the source channels (L R L R ... for stereo)
/// - more → fewer: keep the leading channels
fn map_channels(samples: &[f32], src_channels: usize, dst_channels: usize, out: &mut Vec<f32>) {
    out.clear();
    if src_channels == dst_channels {
        out.extend_from_slice(samples);
        return;
    }

    out.reserve(samples.len() / src_channels * dst_channels);
    for frame in samples.chunks_exact(src_channels) {
        for ch in 0..dst_channels {
            let sample = match (src_channels, dst_channels) {
                (2, 1) => 0.5 * (frame[0] + frame[1]),
                (1, _) => frame[0],
                _ if src_channels < dst_channels => frame[ch % src_channels],
                _ => frame[ch],
            };
            out.push(sample);
        }
    }
}

fn write_s16(samples: &[f32], out: &mut Vec<u8>) {
    for &s in samples {
        let v = i16::from_sample(s.clamp(-1.0, 1.0));
        out.extend_from_slice(&v.to_ne_bytes());
    }
}
