//! # Configuration Management
//!
//! Centralized configuration for the framing protocol and connection engine.
//!
//! This module provides structured configuration for servers and clients,
//! including endpoints, timeouts, the transport message limit and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Environment variables via `from_env()` (`NETFRAME_*`)
//! - Direct instantiation with defaults

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

use crate::core::codec::DEFAULT_MAX_MESSAGE_LENGTH;
use crate::error::{NetError, Result};

/// Default interval for sending keep-alive frames on an otherwise idle
/// connection.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Default timeout for outbound connection attempts.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerSection,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientSection,

    /// Transport configuration
    #[serde(default)]
    pub transport: TransportSection,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSection,
}

impl NetConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| NetError::Configuration(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| NetError::Configuration(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| NetError::Configuration(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("NETFRAME_SERVER_HOST") {
            config.server.host = host;
        }

        if let Ok(port) = std::env::var("NETFRAME_SERVER_PORT") {
            if let Ok(val) = port.parse::<u16>() {
                config.server.port = val;
            }
        }

        if let Ok(host) = std::env::var("NETFRAME_CLIENT_HOST") {
            config.client.host = host;
        }

        if let Ok(port) = std::env::var("NETFRAME_CLIENT_PORT") {
            if let Ok(val) = port.parse::<u16>() {
                config.client.port = val;
            }
        }

        if let Ok(timeout) = std::env::var("NETFRAME_CONNECT_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.client.connect_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(max_len) = std::env::var("NETFRAME_MAX_MESSAGE_LENGTH") {
            if let Ok(val) = max_len.parse::<usize>() {
                config.transport.max_message_length = val;
            }
        }

        if let Ok(interval) = std::env::var("NETFRAME_KEEP_ALIVE_INTERVAL_MS") {
            if let Ok(val) = interval.parse::<u64>() {
                config.transport.keep_alive_interval = Duration::from_millis(val);
            }
        }

        if let Ok(level) = std::env::var("NETFRAME_LOG_LEVEL") {
            if let Ok(val) = level.parse::<Level>() {
                config.logging.log_level = val;
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| NetError::Configuration(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| NetError::Configuration(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(NetError::Configuration(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSection {
    /// Host name or IP address to listen on
    pub host: String,

    /// Port to listen on. Port 0 requests an ephemeral port.
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 9000,
        }
    }
}

impl ServerSection {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.host.trim().is_empty() {
            errors.push("Server host cannot be empty".to_string());
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientSection {
    /// Target host name or IP address
    pub host: String,

    /// Target port
    pub port: u16,

    /// Timeout for connection attempts
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 9000,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ClientSection {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.host.trim().is_empty() {
            errors.push("Client host cannot be empty".to_string());
        }

        if self.port == 0 {
            errors.push("Client port cannot be 0".to_string());
        }

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connect timeout too short (minimum: 100ms)".to_string());
        } else if self.connect_timeout.as_secs() > 300 {
            errors.push("Connect timeout too long (maximum: 300s)".to_string());
        }

        errors
    }
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportSection {
    /// Maximum allowed message length in bytes
    pub max_message_length: usize,

    /// Interval for sending keep-alive frames on an idle connection
    #[serde(with = "duration_serde")]
    pub keep_alive_interval: Duration,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
        }
    }
}

impl TransportSection {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_message_length == 0 {
            errors.push("Max message length cannot be 0".to_string());
        } else if self.max_message_length > i32::MAX as usize {
            errors.push(format!(
                "Max message length too large: {} bytes (the wire format caps frames at {} bytes)",
                self.max_message_length,
                i32::MAX
            ));
        } else if self.max_message_length > 100 * 1024 * 1024 {
            errors.push(format!(
                "Max message length very large: {} bytes (maximum recommended: 100 MB)",
                self.max_message_length
            ));
        }

        if self.keep_alive_interval.as_millis() < 100 {
            errors.push("Keep-alive interval too short (minimum: 100ms)".to_string());
        } else if self.keep_alive_interval.as_secs() > 3600 {
            errors.push("Keep-alive interval too long (maximum: 1 hour)".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSection {
    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            log_to_console: true,
        }
    }
}

impl LoggingSection {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
