use std::sync::atomic::{AtomicU64, Ordering};

use crate::output::OutputFormat;
use crate::player::PlayerState;
use crate::source::StreamInfo;

/// Counters updated by the audio callback.
#[derive(Debug, Default)]
pub struct PlaybackCounters {
    /// Decoded bytes handed to the device (silence excluded).
    pub played_bytes: AtomicU64,
    /// Silence blocks substituted after decode failures.
    pub silence_blocks: AtomicU64,
    /// Callback invocations.
    pub callbacks: AtomicU64,
}

/// Point-in-time view of a player, for display.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerStatus {
    pub identifier: String,
    pub state: PlayerState,
    pub playing: bool,
    /// Audio stream chosen at create time.
    pub source: Option<StreamInfo>,
    /// Format negotiated with the device at play time.
    pub output: Option<OutputFormat>,
    pub queued_bytes: usize,
    pub queued_packets: usize,
    pub played_bytes: u64,
    pub elapsed_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub silence_blocks: u64,
    pub callbacks: u64,
}

impl PlayerStatus {
    /// Fill the counter-derived fields from `counters`.
    pub fn with_counters(mut self, counters: &PlaybackCounters) -> Self {
        self.played_bytes = counters.played_bytes.load(Ordering::Relaxed);
        self.silence_blocks = counters.silence_blocks.load(Ordering::Relaxed);
        self.callbacks = counters.callbacks.load(Ordering::Relaxed);
        self.elapsed_ms = self.output.map(|fmt| fmt.bytes_to_ms(self.played_bytes));
        self
    }

    /// Whether the session is resampling between source and device rates.
    pub fn resampling(&self) -> Option<bool> {
        let src = self.source.as_ref()?.sample_rate?;
        let dst = self.output?.sample_rate;
        Some(src != dst)
    }
}

impl std::fmt::Display for PlayerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.identifier, self.state)?;
        if let Some(src) = &self.source {
            write!(
                f,
                " src={} {}Hz/{}ch",
                src.codec.as_deref().unwrap_or("?"),
                src.sample_rate.unwrap_or(0),
                src.channels.unwrap_or(0)
            )?;
        }
        if let Some(out) = &self.output {
            write!(f, " out={out}")?;
        }
        if let Some(ms) = self.elapsed_ms {
            write!(f, " t={}.{:03}s", ms / 1000, ms % 1000)?;
        }
        if self.silence_blocks > 0 {
            write!(f, " silence={}", self.silence_blocks)?;
        }
        write!(f, " queue={}B/{}pk", self.queued_bytes, self.queued_packets)
    }
}
