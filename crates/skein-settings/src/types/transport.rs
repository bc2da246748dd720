//! Session and transport settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::SettingsError;

/// Default URL of the browser client library referenced by the iframe page.
pub const DEFAULT_CLIENT_LIBRARY_URL: &str =
    "https://cdn.jsdelivr.net/npm/sockjs-client@1.6.1/dist/sockjs.min.js";

/// Session and transport behavior.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// Client library loaded by the iframe bootstrap page.
    pub client_library_url: String,
    /// Bytes a streaming response may carry before it is closed and the
    /// client reconnects.
    pub stream_bytes_limit: usize,
    /// Whether clients must send a session cookie (sticky load balancing).
    pub session_cookie_needed: bool,
    /// Idle period after which a heartbeat frame is queued.
    pub heartbeat_interval_ms: u64,
    /// Idle period after which an unattached session is evicted.
    pub disconnect_delay_ms: u64,
    /// Maximum number of outbound messages buffered per session.
    pub http_message_cache_size: usize,
    /// Whether the websocket transport (and `/websocket`) is served.
    pub websocket_enabled: bool,
    /// Skip origin checks and CORS headers entirely.
    pub suppress_cors: bool,
    /// Exact origins allowed for cross-origin requests (`*` allows all).
    pub allowed_origins: Vec<String>,
    /// Origin patterns with `*` wildcards.
    pub allowed_origin_patterns: Vec<String>,
    /// Fixed period of the heartbeat / expiry sweep.
    pub sweep_interval_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            client_library_url: DEFAULT_CLIENT_LIBRARY_URL.to_string(),
            stream_bytes_limit: 128 * 1024,
            session_cookie_needed: true,
            heartbeat_interval_ms: 25_000,
            disconnect_delay_ms: 5_000,
            http_message_cache_size: 100,
            websocket_enabled: true,
            suppress_cors: false,
            allowed_origins: Vec::new(),
            allowed_origin_patterns: Vec::new(),
            sweep_interval_ms: 1_000,
        }
    }
}

impl TransportSettings {
    /// Heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Disconnect delay as a [`Duration`].
    pub fn disconnect_delay(&self) -> Duration {
        Duration::from_millis(self.disconnect_delay_ms)
    }

    /// Sweep period as a [`Duration`].
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Whether any origin restriction is configured.
    ///
    /// A `*` entry in `allowed_origins` admits everything and is not a
    /// restriction.
    pub fn has_origin_restrictions(&self) -> bool {
        let exact = !self.allowed_origins.is_empty()
            && !self.allowed_origins.iter().any(|o| o == "*");
        exact || !self.allowed_origin_patterns.is_empty()
    }

    /// Check range constraints.
    pub fn validate(&self) -> crate::Result<()> {
        let zero = [
            ("heartbeatIntervalMs", self.heartbeat_interval_ms == 0),
            ("disconnectDelayMs", self.disconnect_delay_ms == 0),
            ("sweepIntervalMs", self.sweep_interval_ms == 0),
            ("httpMessageCacheSize", self.http_message_cache_size == 0),
            ("streamBytesLimit", self.stream_bytes_limit == 0),
        ];
        if let Some((name, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(SettingsError::InvalidValue(format!("{name} must be > 0")));
        }
        Ok(())
    }
}
