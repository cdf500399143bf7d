use crate::error::BuilderError;
use crate::TransportKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_PING_STALE_MS: u64 = 15_000;
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 2_000;
pub const MIN_HEARTBEAT_INTERVAL_MS: u64 = 100;

/// Heartbeat pacing: the wait starts at `interval_min_ms`, grows by
/// `multiplier` after every successful tick up to `interval_max_ms`, and
/// falls back to the minimum on a failed tick or an explicit reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_heartbeat_min")]
    pub interval_min_ms: u64,
    #[serde(default = "default_heartbeat_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_heartbeat_max")]
    pub interval_max_ms: u64,
}

fn default_heartbeat_min() -> u64 {
    1_000
}

fn default_heartbeat_multiplier() -> f64 {
    2.0
}

fn default_heartbeat_max() -> u64 {
    10_000
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        HeartbeatConfig {
            interval_min_ms: default_heartbeat_min(),
            multiplier: default_heartbeat_multiplier(),
            interval_max_ms: default_heartbeat_max(),
        }
    }
}

impl HeartbeatConfig {
    pub fn interval_min(&self) -> Duration {
        Duration::from_millis(self.interval_min_ms)
    }

    pub fn interval_max(&self) -> Duration {
        Duration::from_millis(self.interval_max_ms)
    }

    pub fn validate(&self) -> Result<(), BuilderError> {
        if self.interval_min_ms < MIN_HEARTBEAT_INTERVAL_MS {
            return Err(BuilderError::InvalidConfig(format!(
                "heartbeat interval_min_ms must be at least {} ms",
                MIN_HEARTBEAT_INTERVAL_MS
            )));
        }
        if self.multiplier < 1.0 {
            return Err(BuilderError::InvalidConfig(
                "heartbeat multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.interval_max_ms < self.interval_min_ms {
            return Err(BuilderError::InvalidConfig(
                "heartbeat interval_max_ms must not be below interval_min_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration shared by every carrier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub name: String,
    pub kind: TransportKind,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default = "default_ping_stale")]
    pub ping_stale_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}

fn default_ack_timeout() -> u64 {
    DEFAULT_ACK_TIMEOUT_MS
}

fn default_ping_stale() -> u64 {
    DEFAULT_PING_STALE_MS
}

impl TransportConfig {
    pub fn new(name: impl Into<String>, kind: TransportKind) -> Self {
        TransportConfig {
            name: name.into(),
            kind,
            max_message_bytes: default_max_message_bytes(),
            ack_timeout_ms: default_ack_timeout(),
            heartbeat: HeartbeatConfig::default(),
            ping_stale_ms: default_ping_stale(),
            password: None,
        }
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn ping_stale(&self) -> Duration {
        Duration::from_millis(self.ping_stale_ms)
    }

    pub fn validate(&self) -> Result<(), BuilderError> {
        if self.name.trim().is_empty() {
            return Err(BuilderError::InvalidConfig(
                "transport name must not be blank".to_string(),
            ));
        }
        // The electron kinds parse (they are part of the closed tag set)
        // but have no carrier in this workspace.
        if matches!(
            self.kind,
            TransportKind::ElectronIpcMain | TransportKind::ElectronIpcRenderer
        ) {
            return Err(BuilderError::UnsupportedTransport(self.kind));
        }
        self.heartbeat.validate()
    }
}

/// Webhook-carrier specifics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub url: String,
    /// Heartbeat target; falls back to `url` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ping_url: Option<String>,
    /// Sent as the `x-transport-token` header when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "default_http_timeout")]
    pub timeout_ms: u64,
}

fn default_http_timeout() -> u64 {
    DEFAULT_HTTP_TIMEOUT_MS
}

impl HttpConfig {
    pub fn new(url: impl Into<String>) -> Self {
        HttpConfig {
            url: url.into(),
            ping_url: None,
            token: None,
            timeout_ms: default_http_timeout(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn ping_url(&self) -> &str {
        self.ping_url.as_deref().unwrap_or(&self.url)
    }
}

/// WebSocket-carrier specifics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protocols: Vec<String>,
}

impl WsConfig {
    pub fn new(url: impl Into<String>) -> Self {
        WsConfig {
            url: url.into(),
            path: None,
            protocols: Vec::new(),
        }
    }

    /// The connect target with the optional path appended.
    pub fn target(&self) -> String {
        match &self.path {
            Some(path) => format!(
                "{}/{}",
                self.url.trim_end_matches('/'),
                path.trim_start_matches('/')
            ),
            None => self.url.clone(),
        }
    }
}
