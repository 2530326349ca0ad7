//! Error types for the DRLMS server

use thiserror::Error;

/// Failures that stop the server or end a connection
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for server operations
pub type Result<T> = std::result::Result<T, ServerError>;
