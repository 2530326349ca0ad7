//! # DRLMS Server
//!
//! Reference server for the DRLMS file protocol. Serves the regular files
//! of one root directory to clients that log in with a name and password
//! from the configured users table.

pub mod config;
pub mod error;
pub mod server;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use server::Server;
