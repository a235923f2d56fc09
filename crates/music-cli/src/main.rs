//! `music`: play a local audio file on an output device.
//!
//! A read thread demuxes the file into a packet queue; the device callback decodes,
//! resamples to the device rate and plays. See the `music-player` crate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use music_cli::cli::{Args, Command};
use music_cli::config::{FileConfig, PlayConfig};
use music_cli::runtime;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,music_player=info,music=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    match &args.cmd {
        Some(Command::Play { path, preload }) => {
            let interrupted = Arc::new(AtomicBool::new(false));
            let flag = interrupted.clone();
            let _ = ctrlc::set_handler(move || {
                if flag.swap(true, Ordering::Relaxed) {
                    std::process::exit(130);
                }
            });

            let config = PlayConfig::resolve(path.clone(), *preload, file, &args);
            runtime::run_play(config, interrupted)
        }
        None => bail!("nothing to do: pass a command (try `music play <path>`) or --list-devices"),
    }
}
