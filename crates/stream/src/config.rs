//! Client configuration loaded from environment variables.

use std::time::Duration;

use crate::reconnect::ReconnectConfig;

/// Configuration for one [`crate::manager::JobStreamManager`].
///
/// All fields have defaults suitable for a locally running server;
/// override via environment variables in deployed setups.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// WebSocket base URL, e.g. `ws://localhost:8484`.
    pub ws_url: String,
    /// HTTP API base URL, e.g. `http://localhost:8484`.
    pub api_url: String,
    /// Backoff policy for reconnection attempts.
    pub reconnect: ReconnectConfig,
    /// How often buffered log envelopes are flushed to subscribers.
    pub log_flush_interval: Duration,
    /// Capacity of the outbound queue for frames sent while the
    /// connection is still opening. `None` disables queueing; the job
    /// stream is receive-only, so that is the default.
    pub outbound_queue_capacity: Option<usize>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8484".into(),
            api_url: "http://localhost:8484".into(),
            reconnect: ReconnectConfig::default(),
            log_flush_interval: Duration::from_millis(100),
            outbound_queue_capacity: None,
        }
    }
}

impl StreamConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default                  |
    /// |----------------------------------|--------------------------|
    /// | `SHELFSYNC_WS_URL`               | `ws://localhost:8484`    |
    /// | `SHELFSYNC_API_URL`              | `http://localhost:8484`  |
    /// | `SHELFSYNC_LOG_FLUSH_MS`         | `100`                    |
    /// | `SHELFSYNC_RECONNECT_BASE_MS`    | `1000`                   |
    /// | `SHELFSYNC_RECONNECT_MAX_ATTEMPTS` | `8`                    |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let ws_url = std::env::var("SHELFSYNC_WS_URL").unwrap_or(defaults.ws_url);
        let api_url = std::env::var("SHELFSYNC_API_URL").unwrap_or(defaults.api_url);

        let log_flush_ms: u64 = std::env::var("SHELFSYNC_LOG_FLUSH_MS")
            .unwrap_or_else(|_| "100".into())
            .parse()
            .expect("SHELFSYNC_LOG_FLUSH_MS must be a valid u64");

        let base_ms: u64 = std::env::var("SHELFSYNC_RECONNECT_BASE_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("SHELFSYNC_RECONNECT_BASE_MS must be a valid u64");

        let max_attempts: u32 = std::env::var("SHELFSYNC_RECONNECT_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "8".into())
            .parse()
            .expect("SHELFSYNC_RECONNECT_MAX_ATTEMPTS must be a valid u32");

        Self {
            ws_url,
            api_url,
            reconnect: ReconnectConfig {
                base_delay: Duration::from_millis(base_ms),
                max_attempts,
                ..defaults.reconnect
            },
            log_flush_interval: Duration::from_millis(log_flush_ms),
            outbound_queue_capacity: None,
        }
    }
}
