use std::time::Duration;

use taskflow_settings::RealtimeSettings;

/// Runtime configuration for [`crate::RealtimeClient`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RealtimeConfig {
    /// URL actually dialled; already includes the SockJS `/websocket` suffix.
    pub endpoint_url: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    /// Pause between workspace subscribe retries while a connect is in flight.
    pub workspace_retry_delay: Duration,
    /// Heart-beat we offer as `(outgoing, incoming)` in ms. 0 disables a direction.
    pub heartbeat_ms: (u64, u64),
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self::from_settings(&RealtimeSettings::default())
    }
}

impl RealtimeConfig {
    pub fn from_settings(settings: &RealtimeSettings) -> Self {
        Self {
            endpoint_url: settings.endpoint_url(),
            max_reconnect_attempts: settings.max_reconnect_attempts,
            reconnect_base_delay: Duration::from_millis(settings.reconnect_base_delay_ms),
            workspace_retry_delay: Duration::from_millis(settings.workspace_retry_delay_ms),
            heartbeat_ms: (settings.heartbeat_outgoing_ms, settings.heartbeat_incoming_ms),
        }
    }

    /// Delay before reconnection attempt `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        backoff_delay(self.reconnect_base_delay, attempt)
    }

    /// Value for the CONNECT `host` header.
    pub fn virtual_host(&self) -> &str {
        let rest = self
            .endpoint_url
            .split_once("://")
            .map_or(self.endpoint_url.as_str(), |(_, rest)| rest);
        let authority = rest.split('/').next().unwrap_or(rest);
        let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
        match authority.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => authority,
        }
    }
}

/// `base × 2^(attempt−1)`, saturating. No jitter, no cap.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent)
}
