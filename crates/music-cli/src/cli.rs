use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "music", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// TOML config file (`device` plus a `[playback]` table)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Backpressure ceiling for queued compressed bytes
    #[arg(long)]
    pub max_queue_bytes: Option<usize>,

    /// Capacity of the converted buffer handed to the device callback, in bytes
    #[arg(long)]
    pub buffer_bytes: Option<usize>,

    /// Requested hardware period in frames
    #[arg(long)]
    pub device_buffer_frames: Option<u32>,

    /// Resampler input chunk size in frames (higher => more latency, lower => more overhead)
    #[arg(long)]
    pub chunk_frames: Option<usize>,

    /// Play the file this many times back to back (0 = until Ctrl-C)
    #[arg(long)]
    pub play_count: Option<u32>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a local file until it ends or Ctrl-C
    Play {
        /// Path to audio file (FLAC, MP3, AAC, ALAC, Vorbis, WAV, AIFF)
        path: PathBuf,

        /// Read the whole file into memory before playing
        #[arg(long)]
        preload: bool,
    },
}
