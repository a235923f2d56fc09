//! Command runtime: device listing and local playback.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::RecvTimeoutError;
use music_player::device;
use music_player::{MusicPlayer, PlayerEvent, PlayerOptions};

use crate::config::PlayConfig;

const EVENT_POLL: Duration = Duration::from_millis(200);

/// Print output devices to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    for (i, d) in device::list_devices(&host)?.iter().enumerate() {
        println!(
            "#{i}: {} ({}-{} Hz, up to {} ch)",
            d.name, d.min_rate, d.max_rate, d.max_channels
        );
    }
    Ok(())
}

/// Play one file until it ends, fails, or `interrupted` is set.
pub fn run_play(config: PlayConfig, interrupted: Arc<AtomicBool>) -> Result<()> {
    let identifier = config.path.to_string_lossy().into_owned();
    let options = PlayerOptions {
        config: config.playback,
        device: config.device,
        ..PlayerOptions::default()
    };
    let mut player = if config.preload {
        let bytes = std::fs::read(&config.path)
            .with_context(|| format!("read {identifier}"))?;
        tracing::info!(bytes = bytes.len(), "preloaded {identifier}");
        MusicPlayer::from_bytes(identifier.clone(), bytes, options)
    } else {
        MusicPlayer::new(identifier.clone(), options)
    };

    player
        .create()
        .with_context(|| format!("open {identifier}"))?;
    let events = player.events();
    player.play().context("start playback")?;

    let outcome = loop {
        match events.recv_timeout(EVENT_POLL) {
            Ok(PlayerEvent::Finished) => break Ok(()),
            Ok(PlayerEvent::Failed(e)) => break Err(anyhow!("playback failed: {e}")),
            Ok(ev) => tracing::debug!(event = ?ev, "player event"),
            Err(RecvTimeoutError::Timeout) => {
                if interrupted.load(Ordering::Relaxed) {
                    tracing::info!("interrupted");
                    break Ok(());
                }
            }
            Err(RecvTimeoutError::Disconnected) => break Ok(()),
        }
    };

    let status = player.status();
    player.destroy();
    tracing::info!(
        elapsed_ms = status.elapsed_ms.unwrap_or(0),
        silence_blocks = status.silence_blocks,
        "{status}"
    );
    outcome
}
