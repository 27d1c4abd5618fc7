//! # Configuration Management Module
//!
//! Typed configuration for the packet BBS: station identity, the AGWPE engine
//! endpoint, message history retention, the supervised Direwolf daemon, and logging.
//!
//! ## Configuration Structure
//!
//! - [`StationConfig`] - BBS callsign and display name
//! - [`AgwpeConfig`] - AGWPE host/port, radio port and engine timeouts
//! - [`MessagesConfig`] - history size and retention policy
//! - [`DirewolfConfig`] - daemon supervision (auto start, command line, timeouts)
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ax25bbs::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     config.validate()?;
//!     println!("Station: {}", config.station.callsign);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [station]
//! callsign = "W1ABC-10"
//! name = "Packet Chat"
//!
//! [agwpe]
//! host = "127.0.0.1"
//! port = 8000
//! radio_port = 0
//!
//! [messages]
//! max_messages = 15
//! retention_hours = 24
//! retention = "count"
//! ```
//!
//! Every section except `[station]` may be omitted and falls back to defaults.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

use crate::bbs::message_store::{AgeBound, CountBound, MessageStore};
use crate::supervisor::SupervisorSettings;
use crate::validation::{validate_callsign, CallsignError};

/// Errors found while validating a loaded configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid callsign '{callsign}': {reason}. Must be a valid amateur radio callsign with optional SSID (e.g., W1ABC-1)")]
    InvalidCallsign {
        callsign: String,
        reason: CallsignError,
    },

    #[error("Invalid AGWPE port: {0}. Must be between 1-65535")]
    InvalidAgwpePort(u16),

    #[error("Invalid AGWPE host: host must not be empty")]
    EmptyHost,

    #[error("Invalid retention_hours: {0}. Must be > 0")]
    InvalidRetention(u32),

    #[error("Invalid retention_hours: {hours}. Must be at most {max}")]
    RetentionTooLong { hours: u32, max: u32 },

    #[error("Invalid direwolf.startup_timeout_secs: must be > 0")]
    InvalidStartupTimeout,

    #[error("Invalid direwolf.command: must not be empty")]
    EmptyDaemonCommand,
}

/// Longest accepted age window: ten years.
pub const MAX_RETENTION_HOURS: u32 = 24 * 365 * 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub station: StationConfig,
    #[serde(default)]
    pub agwpe: AgwpeConfig,
    #[serde(default)]
    pub messages: MessagesConfig,
    #[serde(default)]
    pub direwolf: DirewolfConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// The BBS callsign registered with the AGWPE engine (e.g. `W1ABC-10`).
    pub callsign: String,
    /// Name shown in the welcome banner.
    #[serde(default = "default_station_name")]
    pub name: String,
}

fn default_station_name() -> String {
    "Packet Chat".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgwpeConfig {
    pub host: String,
    pub port: u16,
    /// Radio channel index inside the TNC (0-255).
    pub radio_port: u8,
    /// Seconds to wait for the engine's version reply before giving up.
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_ready_timeout() -> u64 {
    5
}

fn default_connect_timeout() -> u64 {
    5
}

impl Default for AgwpeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            radio_port: 0,
            ready_timeout_secs: default_ready_timeout(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl AgwpeConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Which eviction strategy bounds the shared history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetentionMode {
    /// Keep the newest `max_messages` entries.
    #[default]
    Count,
    /// Keep everything younger than `retention_hours`.
    Age,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagesConfig {
    /// History size for count retention. 0 disables history in either mode.
    pub max_messages: usize,
    pub retention_hours: u32,
    #[serde(default)]
    pub retention: RetentionMode,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            max_messages: 15,
            retention_hours: 24,
            retention: RetentionMode::Count,
        }
    }
}

impl MessagesConfig {
    pub fn retention_window(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.retention_hours))
    }

    /// Build the message store selected by this section.
    pub fn build_store(&self) -> MessageStore {
        if self.max_messages == 0 {
            return MessageStore::new(CountBound::new(0));
        }
        match self.retention {
            RetentionMode::Count => MessageStore::new(CountBound::new(self.max_messages)),
            RetentionMode::Age => MessageStore::new(AgeBound::new(self.retention_window())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirewolfConfig {
    /// Launch (or adopt) the modem daemon on `start`.
    pub auto_start: bool,
    /// Shut the BBS down when the supervised daemon dies.
    pub auto_shutdown: bool,
    /// Executable or wrapper script invoked as `<command> -c <config_path> <args...>`.
    pub command: String,
    pub config_path: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub startup_timeout_secs: u64,
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,
}

fn default_stop_grace() -> u64 {
    3
}

impl Default for DirewolfConfig {
    fn default() -> Self {
        Self {
            auto_start: true,
            auto_shutdown: true,
            command: "direwolf".to_string(),
            config_path: "config/direwolf.conf".to_string(),
            args: vec!["-t".to_string(), "0".to_string()],
            startup_timeout_secs: 10,
            stop_grace_secs: default_stop_grace(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Parse `level` into a filter, falling back to `Info` for unknown names.
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level
            .parse::<log::LevelFilter>()
            .unwrap_or(log::LevelFilter::Info)
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        Self::from_toml(&content).map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        config.station.callsign = config.station.callsign.trim().to_ascii_uppercase();
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Check every value the runtime depends on. Called once at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_callsign(&self.station.callsign).map_err(|reason| {
            ConfigError::InvalidCallsign {
                callsign: self.station.callsign.clone(),
                reason,
            }
        })?;
        if self.agwpe.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.agwpe.port == 0 {
            return Err(ConfigError::InvalidAgwpePort(self.agwpe.port));
        }
        if self.messages.retention_hours == 0 {
            return Err(ConfigError::InvalidRetention(self.messages.retention_hours));
        }
        if self.messages.retention_hours > MAX_RETENTION_HOURS {
            return Err(ConfigError::RetentionTooLong {
                hours: self.messages.retention_hours,
                max: MAX_RETENTION_HOURS,
            });
        }
        if self.direwolf.auto_start {
            if self.direwolf.command.trim().is_empty() {
                return Err(ConfigError::EmptyDaemonCommand);
            }
            if self.direwolf.startup_timeout_secs == 0 {
                return Err(ConfigError::InvalidStartupTimeout);
            }
        }
        Ok(())
    }

    /// Settings for the daemon supervisor, probing the same endpoint the engine uses.
    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            command: PathBuf::from(&self.direwolf.command),
            config_path: PathBuf::from(&self.direwolf.config_path),
            args: self.direwolf.args.clone(),
            host: self.agwpe.host.clone(),
            port: self.agwpe.port,
            startup_timeout: Duration::from_secs(self.direwolf.startup_timeout_secs),
            stop_grace: Duration::from_secs(self.direwolf.stop_grace_secs),
            ..SupervisorSettings::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            station: StationConfig {
                callsign: "N0CALL-1".to_string(),
                name: default_station_name(),
            },
            agwpe: AgwpeConfig::default(),
            messages: MessagesConfig::default(),
            direwolf: DirewolfConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("ax25bbs.log".to_string()),
            },
        }
    }
}
