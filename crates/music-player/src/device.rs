//! CPAL output device.
//!
//! - selecting either the default device or a device by substring match
//! - negotiating the supported config closest to the source format
//! - building the output stream that pulls from an [`AudioCallback`]
//!
//! The callback always produces S16. Devices whose preferred config uses another sample
//! type get converted per sample in the CPAL data callback.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::error::OutputError;
use crate::output::{AudioOutput, OutputFormat};
use crate::playback::AudioCallback;
use crate::resample::BYTES_PER_SAMPLE;

/// [`AudioOutput`] backed by the default CPAL host.
pub struct CpalOutput {
    device_name: Option<String>,
    buffer_frames: u32,
    stream: Option<cpal::Stream>,
    label: Option<String>,
}

impl CpalOutput {
    pub fn new(device_name: Option<String>, buffer_frames: u32) -> Self {
        Self {
            device_name,
            buffer_frames,
            stream: None,
            label: None,
        }
    }

    fn device(&self) -> Result<cpal::Device, OutputError> {
        let host = cpal::default_host();
        pick_device(&host, self.device_name.as_deref())
            .map_err(|e| OutputError::NoDevice(format!("{e:#}")))
    }
}

impl AudioOutput for CpalOutput {
    fn negotiate(&self, requested: OutputFormat) -> Result<OutputFormat, OutputError> {
        let device = self.device()?;
        let config = pick_output_config(&device, requested)
            .map_err(|e| OutputError::UnsupportedConfig(format!("{e:#}")))?;
        Ok(OutputFormat::new(config.sample_rate(), config.channels()))
    }

    fn open(&mut self, format: OutputFormat, callback: AudioCallback) -> Result<(), OutputError> {
        self.close();

        let device = self.device()?;
        let supported = pick_output_config(&device, format)
            .map_err(|e| OutputError::UnsupportedConfig(format!("{e:#}")))?;
        if supported.sample_rate() != format.sample_rate || supported.channels() != format.channels {
            return Err(OutputError::UnsupportedConfig(format!(
                "device no longer offers {format}"
            )));
        }

        let mut config = supported.config();
        if let Some(buffer_size) = pick_buffer_size(&supported, self.buffer_frames) {
            config.buffer_size = buffer_size;
        }

        let name = device
            .description()
            .map(|d| d.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());
        tracing::info!(
            device = %name,
            rate_hz = config.sample_rate,
            channels = config.channels,
            sample_format = ?supported.sample_format(),
            buffer = ?config.buffer_size,
            "opening output stream"
        );

        let stream = build_output_stream(&device, &config, supported.sample_format(), callback)?;
        self.stream = Some(stream);
        self.label = Some(name);
        Ok(())
    }

    fn start(&mut self) -> Result<(), OutputError> {
        let stream = self.stream.as_ref().ok_or(OutputError::NotOpen)?;
        stream.play().map_err(|e| OutputError::Start(e.to_string()))
    }

    fn stop(&mut self) -> Result<(), OutputError> {
        match &self.stream {
            Some(stream) => stream.pause().map_err(|e| OutputError::Start(e.to_string())),
            None => Ok(()),
        }
    }

    fn close(&mut self) {
        // Dropping the stream stops callbacks and drops the callback state.
        self.stream = None;
    }

    fn description(&self) -> String {
        self.label
            .clone()
            .or_else(|| self.device_name.clone())
            .unwrap_or_else(|| "default output".to_string())
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    callback: AudioCallback,
) -> Result<cpal::Stream, OutputError> {
    match sample_format {
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, callback),
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, callback),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, callback),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, callback),
        other => Err(OutputError::UnsupportedConfig(format!(
            "sample format {other:?}"
        ))),
    }
}

/// Type-specialized stream builder: the callback fills S16 bytes which are converted to
/// the device sample type in place.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut callback: AudioCallback,
) -> Result<cpal::Stream, OutputError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<i16>,
{
    let mut bytes: Vec<u8> = Vec::new();
    let err_fn = |err| tracing::warn!("stream error: {err}");

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                let needed = data.len() * BYTES_PER_SAMPLE;
                if bytes.len() != needed {
                    bytes.resize(needed, 0);
                }
                callback.fill(&mut bytes);
                for (dst, src) in data.iter_mut().zip(bytes.chunks_exact(BYTES_PER_SAMPLE)) {
                    let sample = i16::from_ne_bytes([src[0], src[1]]);
                    *dst = <T as cpal::Sample>::from_sample::<i16>(sample);
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| OutputError::Build(e.to_string()))
}

/// Pick the first output device matching `needle` (case-insensitive), or the default device.
///
/// Returns an error if no suitable device is found.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .context("No output devices")?
        .collect();

    if let Some(needle) = needle {
        if let Some(d) = devices.drain(..).find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose the supported output config closest to `requested`.
///
/// Ranking, in order:
/// - same channel count as requested
/// - highest sample rate **<= requested** (else the lowest rate above it)
/// - sample format closest to S16
pub fn pick_output_config(
    device: &cpal::Device,
    requested: OutputFormat,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> =
        device.supported_output_configs()?.collect();

    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;

    for range in ranges {
        let rate = pick_rate_for_range(
            range.min_sample_rate(),
            range.max_sample_rate(),
            requested.sample_rate,
        );
        let candidate = Candidate {
            channels_match: range.channels() == requested.channels,
            below: rate <= requested.sample_rate,
            rate,
            format_rank: sample_format_rank(range.sample_format()),
        };
        let replace = match &best {
            None => true,
            Some((b, _)) => candidate.is_better_than(b),
        };
        if replace {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Hardware period for the stream: `requested` frames clamped to what the device offers.
///
/// Returns `None` when the device only supports its default buffer size.
pub fn pick_buffer_size(
    config: &cpal::SupportedStreamConfig,
    requested: u32,
) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed(clamp_buffer_frames(requested, *min, *max)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Output device names and their supported rate ranges, for `--list-devices`.
pub fn list_devices(host: &cpal::Host) -> Result<Vec<DeviceInfo>> {
    let devices = host.output_devices().context("No output devices")?;
    let mut out = Vec::new();
    for d in devices {
        let name = d.description()?.to_string();
        let mut info = DeviceInfo {
            name,
            min_rate: u32::MAX,
            max_rate: 0,
            max_channels: 0,
        };
        if let Ok(ranges) = d.supported_output_configs() {
            for r in ranges {
                info.min_rate = info.min_rate.min(r.min_sample_rate());
                info.max_rate = info.max_rate.max(r.max_sample_rate());
                info.max_channels = info.max_channels.max(r.channels());
            }
        }
        if info.min_rate == u32::MAX {
            info.min_rate = 0;
        }
        out.push(info);
    }
    Ok(out)
}

/// Output device metadata for device selection.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub name: String,
    pub min_rate: u32,
    pub max_rate: u32,
    pub max_channels: u16,
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    channels_match: bool,
    below: bool,
    rate: u32,
    format_rank: u8,
}

impl Candidate {
    fn is_better_than(&self, best: &Candidate) -> bool {
        if self.channels_match != best.channels_match {
            self.channels_match
        } else if self.below != best.below {
            self.below
        } else if self.rate != best.rate {
            if self.below {
                self.rate > best.rate
            } else {
                self.rate < best.rate
            }
        } else {
            self.format_rank < best.format_rank
        }
    }
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::I16 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::F32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn clamp_buffer_frames(requested: u32, min: u32, max: u32) -> u32 {
    requested.clamp(min, max.max(min))
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
