use std::{fs, path::Path, time::Duration};

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

/// Default endpoint of the trade gateway
pub const DEFAULT_ENDPOINT: &str = "tcp://127.0.0.1:9527";

/// Client settings.
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// endpoint = "tcp://10.0.0.5:9527"
/// call_timeout_ms = 5000
///
/// [reconnect]
/// max_attempts = 10
/// ```
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// `tcp://host:port` or `ipc:///path`
    pub endpoint: String,

    /// Session identity announced to the peer; generated when absent.
    pub identity: Option<String>,

    pub call_timeout_ms: u64,

    pub heartbeat_interval_ms: u64,

    /// Silence after which the peer is reported stale.
    pub heartbeat_timeout_ms: u64,

    /// Upper bound on one wait of the session loop and the dispatcher.
    pub poll_interval_ms: u64,

    /// Bound on a single dial or write.
    pub io_timeout_ms: u64,

    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            identity: None,
            call_timeout_ms: 3_000,
            heartbeat_interval_ms: 1_000,
            heartbeat_timeout_ms: 3_000,
            poll_interval_ms: 500,
            io_timeout_ms: 3_000,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.call_timeout_ms > 0, "call_timeout_ms must be positive");
        anyhow::ensure!(self.poll_interval_ms > 0, "poll_interval_ms must be positive");
        anyhow::ensure!(self.io_timeout_ms > 0, "io_timeout_ms must be positive");
        anyhow::ensure!(
            self.heartbeat_interval_ms > 0,
            "heartbeat_interval_ms must be positive"
        );
        anyhow::ensure!(
            self.heartbeat_timeout_ms >= self.heartbeat_interval_ms,
            "heartbeat_timeout_ms must not be shorter than heartbeat_interval_ms"
        );
        anyhow::ensure!(
            self.reconnect.backoff_multiplier >= 1.0,
            "reconnect.backoff_multiplier must be at least 1.0"
        );
        Ok(())
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// 重连配置
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Re-dial after the transport is lost. The first dial always happens.
    pub enabled: bool,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_multiplier: f64,
    /// None means unlimited retries
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_ms: 1_000,
            max_interval_ms: 60_000,
            backoff_multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }
}
