//! # DRLMS Client
//!
//! Session and file-transfer client for the DRLMS file service.
//!
//! A [`Session`] owns one TCP connection. It is created by
//! [`Session::login`], used for [`list_files`](Session::list_files),
//! [`upload_file`](Session::upload_file) and
//! [`download_file`](Session::download_file), and torn down by
//! [`Session::reset`]. Every failure comes back as an [`Error`] value;
//! nothing is retried internally.
//!
//! ```no_run
//! # async fn demo() -> drlms_client::Result<()> {
//! use drlms_client::Session;
//! use std::time::Duration;
//!
//! let mut session =
//!     Session::login("127.0.0.1", 8080, "alice", "password", Duration::from_secs(5)).await?;
//! for entry in session.list_files().await? {
//!     println!("{entry}");
//! }
//! session
//!     .upload_file("notes.txt", |sent: u64, total: u64| eprintln!("{sent}/{total}"))
//!     .await?;
//! session.reset();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod progress;
pub mod session;
pub mod transfer;
pub mod transport;

pub use config::ClientConfig;
pub use drlms_core::{FileEntry, LogFormat, LoggingConfig, ProtocolResponse, TransferProgress};
pub use error::{ConnectError, Error, OperationError, Result};
pub use progress::{progress_channel, NoProgress, ProgressReporter, WatchReporter};
pub use session::{Session, SessionOptions, DEFAULT_CHUNK_SIZE};
pub use transport::Transport;
