//! Configuration for the DRLMS client

use crate::error::{Error, Result};
use crate::session::{SessionOptions, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use drlms_core::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Client configuration
///
/// The password is not read from the file; it comes from the
/// command line or the `DRLMS_PASSWORD` environment variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server host name or address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Login name
    #[serde(default = "default_user")]
    pub user: String,

    /// Connect timeout in seconds (resolution plus TCP handshake)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Per-read/write timeout in seconds once connected; unset waits forever
    #[serde(default)]
    pub io_timeout: Option<u64>,

    /// Transfer chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            connect_timeout: default_connect_timeout(),
            io_timeout: None,
            chunk_size: default_chunk_size(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;

        toml::from_str(&content).map_err(|e| Error::Config(format!("failed to parse config: {e}")))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// [`Error::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::Config("port must be in 1..=65535".to_string()));
        }
        if self.user.is_empty() {
            return Err(Error::Config("user must not be empty".to_string()));
        }
        if self.connect_timeout == 0 {
            return Err(Error::Config(
                "connect_timeout must be at least 1 second".to_string(),
            ));
        }
        if self.io_timeout == Some(0) {
            return Err(Error::Config(
                "io_timeout must be at least 1 second when set".to_string(),
            ));
        }
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(Error::Config(format!(
                "chunk_size must be between {MIN_CHUNK_SIZE} and {MAX_CHUNK_SIZE} bytes"
            )));
        }
        Ok(())
    }

    /// Session tuning derived from this configuration
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            io_timeout: self.io_timeout.map(Duration::from_secs),
            chunk_size: self.chunk_size,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_user() -> String {
    "alice".to_string()
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_chunk_size() -> usize {
    crate::session::DEFAULT_CHUNK_SIZE
}
