//! Authenticated session
//!
//! A [`Session`] is the single source of truth for "are we connected and
//! logged in". It exclusively owns its [`Transport`]; operations borrow the
//! session mutably, so at most one exchange can be in flight at a time.

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::transport::Transport;
use drlms_core::{ProtocolResponse, Request};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default transfer chunk size (32 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Smallest accepted chunk size
pub const MIN_CHUNK_SIZE: usize = 1024;

/// Largest accepted chunk size
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection and transfer tuning for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Bound on name resolution plus TCP handshake
    pub connect_timeout: Duration,
    /// Bound on each read or write once connected; `None` waits for the peer
    pub io_timeout: Option<Duration>,
    /// Bytes moved per read/write cycle and per progress report
    pub chunk_size: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl SessionOptions {
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for a zero connect timeout or a chunk
    /// size outside `MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE`.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(Error::InvalidArgument(
                "connect timeout must be greater than zero".to_string(),
            ));
        }
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(Error::InvalidArgument(format!(
                "chunk size {} outside {MIN_CHUNK_SIZE}..={MAX_CHUNK_SIZE}",
                self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Login state plus the connection it was established on
#[derive(Debug, Default)]
pub struct Session {
    host: String,
    port: u16,
    user: String,
    token: String,
    authenticated: bool,
    transport: Option<Transport>,
    options: SessionOptions,
}

impl Session {
    /// An empty, disconnected session
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect and log in with default options apart from the timeout.
    ///
    /// # Errors
    ///
    /// See [`Session::login_with_options`].
    pub async fn login(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let options = SessionOptions {
            connect_timeout,
            ..SessionOptions::default()
        };
        Self::login_with_options(host, port, user, password, options).await
    }

    /// Connect and log in using the endpoint and tuning from `config`.
    ///
    /// # Errors
    ///
    /// See [`Session::login_with_options`].
    pub async fn login_with(config: &ClientConfig, password: &str) -> Result<Self> {
        Self::login_with_options(
            &config.host,
            config.port,
            &config.user,
            password,
            config.session_options(),
        )
        .await
    }

    /// Open a transport, send `LOGIN` and wait for the verdict.
    ///
    /// Either an authenticated session comes back or the transport has
    /// already been closed; there is no half-logged-in outcome.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for port 0, bad options, or credentials
    ///   containing reserved characters (checked before connecting)
    /// - [`Error::Connect`] when the server cannot be reached
    /// - [`Error::Login`] when the server answers `ERR|<reason>`
    /// - [`Error::ConnectionClosed`] / [`Error::MalformedResponse`] when the
    ///   reply never arrives or is garbage
    pub async fn login_with_options(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        options: SessionOptions,
    ) -> Result<Self> {
        if port == 0 {
            return Err(Error::InvalidArgument("port must be in 1..=65535".to_string()));
        }
        options.validate()?;
        let request = Request::Login {
            user: user.to_string(),
            password: password.to_string(),
        };
        request.encode()?;

        info!(event = "login_started", host, port, user, "Connecting");
        let mut transport = Transport::connect(host, port, options.connect_timeout).await?;
        transport.set_io_timeout(options.io_timeout);

        let reply = match exchange(&mut transport, &request).await {
            Ok(reply) => reply,
            Err(e) => {
                transport.close();
                warn!(event = "login_failed", host, port, user, error = %e, "Login exchange failed");
                return Err(e);
            }
        };

        match reply {
            ProtocolResponse::Ok(token) => {
                info!(event = "login_succeeded", host, port, user, "Logged in");
                Ok(Self {
                    host: host.to_string(),
                    port,
                    user: user.to_string(),
                    token,
                    authenticated: true,
                    transport: Some(transport),
                    options,
                })
            }
            ProtocolResponse::Err(reason) => {
                transport.close();
                warn!(event = "login_rejected", host, port, user, reason = %reason, "Login rejected");
                Err(Error::Login { reason })
            }
        }
    }

    /// Close the transport (if any) and return every field to its empty
    /// default. Safe on an already-empty session and after any failure.
    pub fn reset(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        if self.authenticated {
            debug!(event = "session_reset", host = %self.host, user = %self.user, "Session reset");
        }
        *self = Self::default();
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Payload of the server's `OK` reply to `LOGIN` (may be empty)
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// `true` while the session holds an open, logged-in transport
    pub fn is_authenticated(&self) -> bool {
        self.authenticated && self.transport.as_ref().is_some_and(Transport::is_open)
    }

    /// `true` once a logged-in session has lost its connection. Nothing
    /// works again until [`Session::reset`] and a fresh login.
    pub fn needs_reset(&self) -> bool {
        self.port != 0 && !self.is_authenticated()
    }

    /// Abort whatever is in flight by closing the transport. The session
    /// stays unusable until [`Session::reset`] and a fresh login.
    pub fn abort(&mut self) {
        self.invalidate("aborted by caller");
    }

    pub(crate) fn chunk_size(&self) -> usize {
        self.options.chunk_size
    }

    /// Claim the transport for one exchange.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] unless the session is logged in on an open
    /// transport.
    pub(crate) fn begin_exchange(&mut self) -> Result<Exchange<'_>> {
        if !self.is_authenticated() {
            if self.authenticated {
                self.invalidate("transport already closed");
            }
            return Err(Error::NotConnected);
        }
        let Self {
            transport: Some(transport),
            authenticated,
            ..
        } = self
        else {
            return Err(Error::NotConnected);
        };
        Ok(Exchange {
            transport,
            authenticated,
            finished: false,
        })
    }

    fn invalidate(&mut self, why: &str) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        if self.authenticated {
            warn!(
                event = "session_invalidated",
                host = %self.host,
                user = %self.user,
                reason = why,
                "Session invalidated"
            );
        }
        self.authenticated = false;
    }
}

/// One request/reply exchange in progress.
///
/// If it is dropped before [`Exchange::finish`] (the operation future was
/// dropped mid-stream) the byte stream position is unknown, so the
/// transport is closed and the login dropped.
pub(crate) struct Exchange<'a> {
    transport: &'a mut Transport,
    authenticated: &'a mut bool,
    finished: bool,
}

impl Exchange<'_> {
    pub(crate) fn transport(&mut self) -> &mut Transport {
        self.transport
    }

    /// Release the transport. If the exchange left the transport closed the
    /// login is dropped and any error is marked session-fatal, whatever its
    /// kind.
    pub(crate) fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        self.finished = true;
        if self.transport.is_open() {
            return result;
        }
        *self.authenticated = false;
        warn!(
            event = "session_invalidated",
            peer = %self.transport.peer_addr(),
            "Connection lost during exchange"
        );
        result.map_err(Error::into_session_lost)
    }
}

impl Drop for Exchange<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.transport.close();
        *self.authenticated = false;
        warn!(
            event = "session_invalidated",
            peer = %self.transport.peer_addr(),
            "Operation interrupted mid-exchange"
        );
    }
}

async fn exchange(transport: &mut Transport, request: &Request) -> Result<ProtocolResponse> {
    transport.send_request(request).await?;
    transport.recv_response().await
}
