//! Server configuration
//!
//! Defaults match the classic deployment: all interfaces, port 5000,
//! 100 clients, five minute idle timeout.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::codec::Framing;
use crate::error::ChatError;

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bind address
    pub host: String,

    /// Port to listen on (0 picks an ephemeral port)
    pub port: u16,

    /// Maximum simultaneously registered clients, also the listen backlog
    pub max_clients: usize,

    /// Seconds without input before a liveness probe
    pub idle_timeout_secs: u64,

    /// Server-side read buffer size in bytes
    pub read_buffer_size: usize,

    /// Wire framing mode
    pub framing: Framing,

    /// Log level
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            max_clients: 100,
            idle_timeout_secs: 300,
            read_buffer_size: 1024,
            framing: Framing::Raw,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing keys fall back to their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ChatError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse TOML text; missing keys take their defaults
    pub fn from_toml(contents: &str) -> Result<Self, ChatError> {
        Ok(toml::from_str(contents)?)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.max_clients == 0 {
            return Err(ChatError::Config("max_clients must be > 0".into()));
        }

        if self.idle_timeout_secs == 0 {
            return Err(ChatError::Config("idle_timeout_secs must be > 0".into()));
        }

        if self.read_buffer_size < 64 {
            return Err(ChatError::Config("read_buffer_size must be >= 64".into()));
        }

        Ok(())
    }

    /// `host:port` string for the listener
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `idle_timeout_secs` as a `Duration`
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Listen backlog, equal to capacity
    pub fn backlog(&self) -> u32 {
        u32::try_from(self.max_clients).unwrap_or(u32::MAX)
    }
}
