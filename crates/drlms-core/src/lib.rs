//! # DRLMS Core
//!
//! Wire format and shared types for the DRLMS file service.
//!
//! The protocol is a hybrid of newline-terminated text control lines and
//! raw binary payloads:
//!
//! ```text
//! C: PUT|report.pdf|18230
//! S: OK|ready
//! C: <18230 raw bytes>
//! S: OK|report.pdf
//! ```

pub mod codec;
pub mod error;
pub mod logging;
pub mod types;

pub use codec::{ProtocolResponse, Request};
pub use error::{CodecError, Result};
pub use logging::{LogFormat, LoggingConfig};
pub use types::{FileEntry, TransferProgress};
