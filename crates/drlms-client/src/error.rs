//! Error types for DRLMS client operations
//!
//! Every fallible call returns one of these as a value. Whether the
//! session survives a failure is answered by [`Error::is_session_fatal`].

use drlms_core::CodecError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure to establish the TCP connection
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Peer did not answer within the connect timeout
    #[error("timed out after {after:?} connecting to {addr}")]
    Timeout { addr: String, after: Duration },

    /// Peer actively refused the connection
    #[error("connection refused by {addr}")]
    Refused { addr: String },

    /// Host name could not be resolved
    #[error("could not resolve {host}: {reason}")]
    DnsFailure { host: String, reason: String },

    /// Any other OS-level connect failure (no route, network down, ...)
    #[error("cannot reach {addr}: {source}")]
    Unreachable {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Local or server-side failure during list, upload or download
#[derive(Error, Debug)]
pub enum OperationError {
    /// The server answered `ERR|<reason>`
    #[error("server rejected request: {0}")]
    ServerRejected(String),

    /// The local source file does not exist
    #[error("local file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The local source file could not be read
    #[error("failed to read {}: {source}", path.display())]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The local destination could not be written
    #[error("failed to write {}: {source}", path.display())]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Client error taxonomy
#[derive(Error, Debug)]
pub enum Error {
    /// The connection could not be established
    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),

    /// The peer ended the stream (or the socket failed) mid-exchange.
    /// The session is no longer usable and must be reset.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// A status line was neither `OK|...` nor `ERR|...`
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The server rejected the credentials
    #[error("login rejected: {reason}")]
    Login { reason: String },

    /// List, upload or download failed
    #[error(transparent)]
    Operation(#[from] OperationError),

    /// The session has no authenticated connection
    #[error("session is not connected")]
    NotConnected,

    /// A caller-supplied value cannot be sent on the wire
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid or unreadable configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// An operation failure that also cost the connection: the byte stream
    /// position was lost, so the transport was closed. The wrapped error
    /// says what went wrong; the session must be reset.
    #[error("{0} (connection closed)")]
    SessionLost(Box<Error>),
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::MalformedResponse(_) | CodecError::InvalidSize(_) => {
                Error::MalformedResponse(err.to_string())
            }
            CodecError::ReservedCharacter { .. }
            | CodecError::EmptyField(_)
            | CodecError::UnknownRequest(_) => Error::InvalidArgument(err.to_string()),
        }
    }
}

impl Error {
    /// `true` when the session's connection is gone and the session must be
    /// reset before it can be used again.
    ///
    /// For an operation started on a logged-in session this agrees with
    /// [`Session::needs_reset`](crate::Session::needs_reset) afterwards.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Error::ConnectionClosed(_) | Error::SessionLost(_))
    }

    /// The underlying failure, looking through [`Error::SessionLost`].
    pub fn cause(&self) -> &Error {
        match self {
            Error::SessionLost(inner) => inner.cause(),
            other => other,
        }
    }

    /// `true` when repeating the same call unchanged may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connect(
                ConnectError::Timeout { .. }
                    | ConnectError::Refused { .. }
                    | ConnectError::Unreachable { .. }
            ) | Error::MalformedResponse(_)
        )
    }

    /// `true` when the failure stems from caller input or the local disk
    /// rather than the network or the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.cause(),
            Error::InvalidArgument(_)
                | Error::Config(_)
                | Error::Operation(
                    OperationError::FileNotFound(_)
                        | OperationError::ReadError { .. }
                        | OperationError::WriteError { .. }
                )
        )
    }

    /// Reason text of a server-side `ERR` reply, if that is what this is.
    pub fn server_reason(&self) -> Option<&str> {
        match self.cause() {
            Error::Login { reason } | Error::Operation(OperationError::ServerRejected(reason)) => {
                Some(reason)
            }
            _ => None,
        }
    }

    /// Mark an error as having closed the transport.
    pub(crate) fn into_session_lost(self) -> Self {
        match self {
            Error::ConnectionClosed(_) | Error::SessionLost(_) => self,
            other => Error::SessionLost(Box::new(other)),
        }
    }

    pub(crate) fn closed(context: impl Into<String>) -> Self {
        Error::ConnectionClosed(context.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_fatal_variants() {
        assert!(Error::closed("reset by peer").is_session_fatal());
        assert!(!Error::MalformedResponse("x".into()).is_session_fatal());
        assert!(Error::MalformedResponse("x".into())
            .into_session_lost()
            .is_session_fatal());
        assert!(!Error::from(OperationError::ServerRejected("no".into())).is_session_fatal());
        assert!(!Error::Login { reason: "bad".into() }.is_session_fatal());
    }

    #[test]
    fn test_is_retryable() {
        let refused = Error::from(ConnectError::Refused {
            addr: "127.0.0.1:1".into(),
        });
        assert!(refused.is_retryable());
        assert!(Error::MalformedResponse("x".into()).is_retryable());

        let dns = Error::from(ConnectError::DnsFailure {
            host: "nowhere.invalid".into(),
            reason: "no such host".into(),
        });
        assert!(!dns.is_retryable());
        assert!(!Error::NotConnected.is_retryable());
    }

    #[test]
    fn test_is_client_error() {
        assert!(Error::from(OperationError::FileNotFound("/tmp/x".into())).is_client_error());
        assert!(Error::InvalidArgument("x".into()).is_client_error());
        assert!(!Error::closed("x").is_client_error());
        assert!(!Error::from(OperationError::ServerRejected("x".into())).is_client_error());
    }

    #[test]
    fn test_codec_errors_map_to_taxonomy() {
        let malformed = Error::from(CodecError::MalformedResponse("HELLO".into()));
        assert!(matches!(malformed, Error::MalformedResponse(_)));

        let size = Error::from(CodecError::InvalidSize("abc".into()));
        assert!(matches!(size, Error::MalformedResponse(_)));

        let reserved = Error::from(CodecError::ReservedCharacter {
            field: "name",
            ch: '|',
        });
        assert!(matches!(reserved, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_session_lost_keeps_cause() {
        let lost = Error::from(OperationError::WriteError {
            path: "/tmp/out.bin".into(),
            source: std::io::Error::other("disk full"),
        })
        .into_session_lost();
        assert!(matches!(
            lost.cause(),
            Error::Operation(OperationError::WriteError { .. })
        ));
        assert!(lost.is_client_error());
        assert!(!lost.is_retryable());

        let closed = Error::closed("eof").into_session_lost();
        assert!(matches!(closed, Error::ConnectionClosed(_)));
    }

    #[test]
    fn test_server_reason() {
        let rejected = Error::from(OperationError::ServerRejected("disk_full".into()));
        assert_eq!(rejected.server_reason(), Some("disk_full"));
        assert_eq!(Error::NotConnected.server_reason(), None);
    }
}
