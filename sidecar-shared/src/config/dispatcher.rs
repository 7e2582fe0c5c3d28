//! Dispatcher and bridge tuning knobs.

use std::time::Duration;

use serde::Deserialize;

fn default_shutdown_grace_period_ms() -> u64 {
    // One hour: in-flight executions are not cancelled, they drain.
    3_600_000
}

fn default_history_embed_threshold_bytes() -> usize {
    1024
}

fn default_history_chunk_max_bytes() -> usize {
    256 * 1024
}

/// Tuning for the dispatcher host and the worker bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    /// Upper bound on waiting for in-flight work to drain during stop.
    #[serde(default = "default_shutdown_grace_period_ms")]
    pub shutdown_grace_period_ms: u64,

    /// Past-events payload size above which history is streamed instead of
    /// embedded, when the worker supports streaming. Strictly greater-than.
    #[serde(default = "default_history_embed_threshold_bytes")]
    pub history_embed_threshold_bytes: usize,

    /// Upper bound on one history chunk. Events are never split, so a
    /// single event larger than this still goes out in its own chunk.
    #[serde(default = "default_history_chunk_max_bytes")]
    pub history_chunk_max_bytes: usize,

    /// Optional bound on waiting for a worker reply to one dispatched work
    /// item. Unset means wait indefinitely; the lease on the service side is
    /// then the only recovery path.
    #[serde(default)]
    pub dispatch_timeout_ms: Option<u64>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_period_ms: default_shutdown_grace_period_ms(),
            history_embed_threshold_bytes: default_history_embed_threshold_bytes(),
            history_chunk_max_bytes: default_history_chunk_max_bytes(),
            dispatch_timeout_ms: None,
        }
    }
}

impl DispatcherConfig {
    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_period_ms)
    }

    pub fn dispatch_timeout(&self) -> Option<Duration> {
        self.dispatch_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = DispatcherConfig::default();
        assert_eq!(config.shutdown_grace_period(), Duration::from_secs(3600));
        assert_eq!(config.history_embed_threshold_bytes, 1024);
        assert_eq!(config.history_chunk_max_bytes, 262_144);
        assert!(config.dispatch_timeout().is_none());
    }

    #[test]
    fn test_dispatch_timeout_mapping() {
        let config = DispatcherConfig {
            dispatch_timeout_ms: Some(1500),
            ..Default::default()
        };
        assert_eq!(config.dispatch_timeout(), Some(Duration::from_millis(1500)));
    }
}
