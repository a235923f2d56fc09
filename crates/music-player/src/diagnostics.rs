//! Diagnostic output for playback failures.
//!
//! The player never writes to a global console; hosts inject a sink and decide where
//! messages go.

/// Receives human-readable playback diagnostics.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, message: &str);
}

/// Default sink: forwards every message to `tracing` at warn level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, message: &str) {
        tracing::warn!(target: "music_player::diagnostics", "{message}");
    }
}
