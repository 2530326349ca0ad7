//! Configuration for the DRLMS reference server

use crate::error::{Result, ServerError};
use drlms_core::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Server port (0 picks a free port)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory whose regular files are served
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Accepted credentials, user name to password
    #[serde(default = "default_users")]
    pub users: HashMap<String, String>,

    /// Largest upload accepted, in bytes; unset means unlimited
    #[serde(default)]
    pub max_file_size: Option<u64>,

    /// Bytes moved per read/write cycle when streaming file contents
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            root_dir: default_root_dir(),
            users: default_users(),
            max_file_size: None,
            chunk_size: default_chunk_size(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// [`ServerError::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServerError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        toml::from_str(&content)
            .map_err(|e| ServerError::Config(format!("Failed to parse config: {e}")))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// [`ServerError::Config`] when the root directory is missing, no user
    /// is configured, a user name contains a reserved character, or the
    /// chunk size is zero.
    pub fn validate(&self) -> Result<()> {
        if !self.root_dir.is_dir() {
            return Err(ServerError::Config(format!(
                "Root directory does not exist or is not a directory: {}",
                self.root_dir.display()
            )));
        }

        if self.users.is_empty() {
            return Err(ServerError::Config(
                "At least one user must be configured".to_string(),
            ));
        }

        if let Some(user) = self
            .users
            .keys()
            .find(|u| u.is_empty() || u.contains(['|', '\n', '\r']))
        {
            return Err(ServerError::Config(format!("Invalid user name: {user:?}")));
        }

        if self.chunk_size == 0 {
            return Err(ServerError::Config(
                "chunk_size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Address string to bind the listener on
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("/tmp/drlms")
}

fn default_users() -> HashMap<String, String> {
    HashMap::from([("alice".to_string(), "password".to_string())])
}

fn default_chunk_size() -> usize {
    64 * 1024
}
