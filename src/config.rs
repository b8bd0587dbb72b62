// src/config.rs

//! Manages client configuration: loading from TOML, defaults, and validation.

use crate::core::protocol::UserCredentials;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// The node the static endpoint discoverer resolves.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    1113
}

/// Everything that shapes the behaviour of a single logical connection.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConnectionSettings {
    /// Appears in every log line and error of the connection.
    #[serde(default = "default_connection_name")]
    pub connection_name: String,
    /// When set, every new transport authenticates before it is considered connected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_user_credentials: Option<UserCredentials>,
    #[serde(with = "humantime_serde", default = "default_reconnection_delay")]
    pub reconnection_delay: Duration,
    /// Negative means unlimited.
    #[serde(default = "default_max_reconnections")]
    pub max_reconnections: i32,
    /// Retry budget for operations and subscriptions. Negative means unlimited.
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
    /// Upper bound on items waiting for a connection.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Per-item response timeout; also bounds the authentication handshake.
    #[serde(with = "humantime_serde", default = "default_operation_timeout")]
    pub operation_timeout: Duration,
    #[serde(
        with = "humantime_serde",
        default = "default_operation_timeout_check_period"
    )]
    pub operation_timeout_check_period: Duration,
    /// Fail timed out items instead of retrying them.
    #[serde(default)]
    pub fail_on_no_server_response: bool,
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_heartbeat_timeout")]
    pub heartbeat_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connection_name: default_connection_name(),
            default_user_credentials: None,
            reconnection_delay: default_reconnection_delay(),
            max_reconnections: default_max_reconnections(),
            max_retries: default_max_retries(),
            max_queue_size: default_max_queue_size(),
            operation_timeout: default_operation_timeout(),
            operation_timeout_check_period: default_operation_timeout_check_period(),
            fail_on_no_server_response: false,
            heartbeat_interval: default_heartbeat_interval(),
            heartbeat_timeout: default_heartbeat_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl ConnectionSettings {
    /// Checks the settings for values the connection cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.connection_name.trim().is_empty() {
            return Err(anyhow!("connection_name cannot be empty"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(anyhow!("heartbeat_interval cannot be 0"));
        }
        if self.heartbeat_timeout.is_zero() {
            return Err(anyhow!("heartbeat_timeout cannot be 0"));
        }
        if self.operation_timeout.is_zero() {
            return Err(anyhow!("operation_timeout cannot be 0"));
        }
        if self.operation_timeout_check_period.is_zero() {
            return Err(anyhow!("operation_timeout_check_period cannot be 0"));
        }
        if self.max_queue_size == 0 {
            return Err(anyhow!("max_queue_size cannot be 0"));
        }
        if let Some(credentials) = &self.default_user_credentials
            && credentials.username.trim().is_empty()
        {
            return Err(anyhow!("default_user_credentials.username cannot be empty"));
        }

        if self.heartbeat_timeout < self.heartbeat_interval {
            warn!(
                "heartbeat_timeout ({:?}) is shorter than heartbeat_interval ({:?}); \
                 slow links may be dropped.",
                self.heartbeat_timeout, self.heartbeat_interval
            );
        }
        if self.max_reconnections < 0 {
            warn!("max_reconnections is negative: the connection will reconnect forever.");
        }
        Ok(())
    }
}

fn default_connection_name() -> String {
    format!("esconn-{}", Uuid::new_v4())
}
fn default_reconnection_delay() -> Duration {
    Duration::from_millis(100)
}
fn default_max_reconnections() -> i32 {
    10
}
fn default_max_retries() -> i32 {
    10
}
fn default_max_queue_size() -> usize {
    5000
}
fn default_operation_timeout() -> Duration {
    Duration::from_secs(7)
}
fn default_operation_timeout_check_period() -> Duration {
    Duration::from_secs(1)
}
fn default_heartbeat_interval() -> Duration {
    Duration::from_millis(750)
}
fn default_heartbeat_timeout() -> Duration {
    Duration::from_millis(1500)
}
fn default_connect_timeout() -> Duration {
    Duration::from_secs(1)
}

/// The resolved and validated configuration of the `esconn` binary.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub connection: ConnectionSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            endpoint: EndpointConfig::default(),
            connection: ConnectionSettings::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Reads, parses and validates a TOML configuration file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.port == 0 {
            return Err(anyhow!("endpoint.port cannot be 0"));
        }
        if self.endpoint.host.trim().is_empty() {
            return Err(anyhow!("endpoint.host cannot be empty"));
        }
        self.connection
            .validate()
            .context("invalid [connection] settings")
    }
}
