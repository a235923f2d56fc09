//! CLI configuration: optional TOML file, then command-line overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

pub use music_player::config::PlaybackConfig;

use crate::cli::Args;

/// Settings loaded from the `--config` TOML file.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    /// Output device substring.
    pub device: Option<String>,
    pub playback: PlaybackConfig,
}

impl FileConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("parse config {:?}", path))
    }

    fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str::<FileConfig>(raw)?)
    }
}

/// Resolved settings for `music play`.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayConfig {
    pub path: PathBuf,
    /// Load the file into memory and play from there.
    pub preload: bool,
    pub device: Option<String>,
    pub playback: PlaybackConfig,
}

impl PlayConfig {
    /// Merge file settings with command-line flags; flags win.
    pub fn resolve(path: PathBuf, preload: bool, file: FileConfig, args: &Args) -> Self {
        let mut playback = file.playback;
        if let Some(v) = args.max_queue_bytes {
            playback.max_queue_bytes = v;
        }
        if let Some(v) = args.buffer_bytes {
            playback.buffer_capacity_bytes = v;
        }
        if let Some(v) = args.device_buffer_frames {
            playback.device_buffer_frames = v;
        }
        if let Some(v) = args.chunk_frames {
            playback.resample_chunk_frames = v;
        }
        if let Some(v) = args.play_count {
            playback.play_count = v;
        }
        Self {
            path,
            preload,
            device: normalize_device_name(args.device.clone().or(file.device)),
            playback,
        }
    }
}

pub(crate) fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
