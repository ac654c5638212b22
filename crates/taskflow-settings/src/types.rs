//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every struct is `#[serde(default)]`, so
//! a partial `settings.json` fills the gaps from compiled defaults.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for the taskflow client.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskflowSettings {
    pub realtime: RealtimeSettings,
    pub logging: LoggingSettings,
    pub auth: AuthSettings,
}

impl TaskflowSettings {
    pub fn validate(&self) -> Result<()> {
        self.realtime.validate()
    }
}

/// Broker connection and reconnection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeSettings {
    /// Broker endpoint, e.g. `ws://localhost:8080/ws`.
    pub broker_url: String,
    /// Connect to the raw WebSocket path of a SockJS endpoint.
    pub sockjs: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    /// Delay before retrying a workspace subscribe while the link is still coming up.
    pub workspace_retry_delay_ms: u64,
    pub heartbeat_outgoing_ms: u64,
    pub heartbeat_incoming_ms: u64,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            broker_url: "ws://localhost:8080/ws".to_string(),
            sockjs: true,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1000,
            workspace_retry_delay_ms: 1000,
            heartbeat_outgoing_ms: 10_000,
            heartbeat_incoming_ms: 10_000,
        }
    }
}

impl RealtimeSettings {
    /// The URL actually dialled. SockJS serves raw WebSocket under `/websocket`.
    pub fn endpoint_url(&self) -> String {
        let base = self.broker_url.trim_end_matches('/');
        if self.sockjs && !base.ends_with("/websocket") {
            format!("{base}/websocket")
        } else {
            base.to_string()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.broker_url.starts_with("ws://") || self.broker_url.starts_with("wss://")) {
            return Err(SettingsError::InvalidValue(format!(
                "brokerUrl must use ws:// or wss://, got {}",
                self.broker_url
            )));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(SettingsError::InvalidValue(
                "maxReconnectAttempts must be greater than zero".into(),
            ));
        }
        if self.reconnect_base_delay_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "reconnectBaseDelayMs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` wins when set.
    pub level: String,
    pub json: bool,
    /// Per-target overrides, e.g. `{"taskflow_realtime": "debug"}`.
    pub modules: std::collections::BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            modules: std::collections::BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Token file path; defaults to `~/.taskflow/auth.json` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_file: Option<String>,
}
