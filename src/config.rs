//! Client configuration.
//!
//! The configuration is read from JSON with camelCase keys:
//!
//! ```json
//! {
//!   "enable": true,
//!   "instance": [[["10.0.0.1", 6379]], [["10.0.0.2", 6379]]],
//!   "db": 0,
//!   "authPass": "",
//!   "timeout": 2,
//!   "rwTimeout": 3,
//!   "postHash": "",
//!   "persistent": false,
//!   "allowReconnect": true
//! }
//! ```
//!
//! `instance` is the shard table: the outer list is indexed by shard id and
//! each entry lists the nodes that can serve that shard.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A `[host, port]` pair.
pub type NodeAddr = (String, u16);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default)]
    pub instance: Vec<Vec<NodeAddr>>,
    #[serde(default)]
    pub db: u32,
    #[serde(default)]
    pub auth_pass: String,
    /// Connect timeout in seconds. 0 disables it.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Read/write timeout in seconds. 0 disables it.
    #[serde(default = "default_rw_timeout")]
    pub rw_timeout: u64,
    #[serde(default)]
    pub post_hash: String,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default = "default_true")]
    pub allow_reconnect: bool,
    /// Extra full passes over the node list after the first one fails.
    #[serde(default = "default_retry")]
    pub retry: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_master_poll_attempts")]
    pub master_poll_attempts: u32,
    #[serde(default = "default_master_poll_interval_ms")]
    pub master_poll_interval_ms: u64,
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

fn default_true() -> bool {
    true
}
fn default_timeout() -> u64 {
    2
}
fn default_rw_timeout() -> u64 {
    3
}
fn default_retry() -> u32 {
    1
}
fn default_retry_delay_ms() -> u64 {
    100
}
fn default_master_poll_attempts() -> u32 {
    10
}
fn default_master_poll_interval_ms() -> u64 {
    500
}
fn default_read_buffer_size() -> usize {
    10 * 1024
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enable: true,
            instance: Vec::new(),
            db: 0,
            auth_pass: String::new(),
            timeout: default_timeout(),
            rw_timeout: default_rw_timeout(),
            post_hash: String::new(),
            persistent: false,
            allow_reconnect: true,
            retry: default_retry(),
            retry_delay_ms: default_retry_delay_ms(),
            master_poll_attempts: default_master_poll_attempts(),
            master_poll_interval_ms: default_master_poll_interval_ms(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

impl RedisConfig {
    /// One shard per node, in the given order.
    pub fn with_shards(nodes: Vec<NodeAddr>) -> Self {
        Self {
            instance: nodes.into_iter().map(|node| vec![node]).collect(),
            ..Self::default()
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: RedisConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "readBufferSize must be greater than 0".to_string(),
            ));
        }

        for (index, nodes) in self.instance.iter().enumerate() {
            if let Some((host, _)) = nodes.iter().find(|(host, port)| host.is_empty() || *port == 0)
            {
                return Err(ConfigError::Invalid(format!(
                    "shard {} has an invalid node {:?}",
                    index, host
                )));
            }
        }

        Ok(())
    }

    pub fn shard_count(&self) -> usize {
        self.instance.len()
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            db: self.db,
            auth_pass: (!self.auth_pass.is_empty()).then(|| self.auth_pass.clone()),
            connect_timeout: seconds(self.timeout),
            rw_timeout: seconds(self.rw_timeout),
            persistent: self.persistent,
            allow_reconnect: self.allow_reconnect,
            retry: self.retry,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            master_poll_attempts: self.master_poll_attempts,
            master_poll_interval: Duration::from_millis(self.master_poll_interval_ms),
            read_buffer_size: self.read_buffer_size,
        }
    }
}

fn seconds(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

/// Settings for a single [`Connection`](crate::connection::Connection).
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    pub db: u32,
    pub auth_pass: Option<String>,
    pub connect_timeout: Option<Duration>,
    pub rw_timeout: Option<Duration>,
    pub persistent: bool,
    pub allow_reconnect: bool,
    pub retry: u32,
    pub retry_delay: Duration,
    pub master_poll_attempts: u32,
    pub master_poll_interval: Duration,
    pub read_buffer_size: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        RedisConfig::default().connect_options()
    }
}
