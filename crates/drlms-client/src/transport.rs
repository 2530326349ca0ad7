//! TCP transport
//!
//! Owns exactly one socket. Any I/O failure closes it; the caller sees
//! [`Error::ConnectionClosed`] and the socket is already released.

use crate::error::{ConnectError, Error, Result};
use bytes::{Bytes, BytesMut};
use drlms_core::codec::{LINE_TERMINATOR, MAX_LINE_LEN};
use drlms_core::{ProtocolResponse, Request};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, trace};

/// Largest allocation step taken by [`Transport::recv_exact`]
pub const RECV_CHUNK: usize = 64 * 1024;

/// One live TCP connection to a DRLMS server
#[derive(Debug)]
pub struct Transport {
    stream: Option<BufReader<TcpStream>>,
    peer: SocketAddr,
    io_timeout: Option<Duration>,
}

impl Transport {
    /// Connect to `host:port`, giving up after `connect_timeout`.
    ///
    /// The timeout covers name resolution and the TCP handshake together.
    /// When the host resolves to several addresses they are tried in order
    /// until one accepts or the deadline passes.
    ///
    /// # Errors
    ///
    /// [`ConnectError`] describing why no connection could be made.
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let deadline = Instant::now() + connect_timeout;
        let timed_out = || ConnectError::Timeout {
            addr: addr.clone(),
            after: connect_timeout,
        };

        let candidates: Vec<SocketAddr> =
            match timeout_at(deadline, lookup_host((host, port))).await {
                Err(_) => return Err(timed_out().into()),
                Ok(Err(e)) => {
                    return Err(ConnectError::DnsFailure {
                        host: host.to_string(),
                        reason: e.to_string(),
                    }
                    .into());
                }
                Ok(Ok(addrs)) => addrs.collect(),
            };

        let mut last_failure = None;
        for candidate in candidates {
            match timeout_at(deadline, TcpStream::connect(candidate)).await {
                Err(_) => return Err(timed_out().into()),
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %candidate, error = %e, "Failed to set TCP_NODELAY");
                    }
                    debug!(event = "transport_connected", peer = %candidate, "Connected");
                    return Ok(Self {
                        stream: Some(BufReader::new(stream)),
                        peer: candidate,
                        io_timeout: None,
                    });
                }
                Ok(Err(e)) => {
                    debug!(peer = %candidate, error = %e, "Connect attempt failed");
                    last_failure = Some((candidate, e));
                }
            }
        }

        let Some((candidate, source)) = last_failure else {
            return Err(ConnectError::DnsFailure {
                host: host.to_string(),
                reason: "no addresses found".to_string(),
            }
            .into());
        };

        let err = if source.kind() == io::ErrorKind::ConnectionRefused {
            ConnectError::Refused {
                addr: candidate.to_string(),
            }
        } else {
            ConnectError::Unreachable {
                addr: candidate.to_string(),
                source,
            }
        };
        Err(err.into())
    }

    /// Bound every subsequent read and write. `None` (the default) waits
    /// until the peer closes.
    pub fn set_io_timeout(&mut self, io_timeout: Option<Duration>) {
        self.io_timeout = io_timeout;
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Receive one line, terminator (and a trailing `\r`) excluded.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] if the peer closes before a full line
    /// arrives, [`Error::MalformedResponse`] for an over-long or non-UTF-8
    /// line.
    pub async fn recv_line(&mut self) -> Result<String> {
        let limit = self.io_timeout;
        let stream = self.stream_mut()?;
        let mut buf = Vec::new();
        let read = with_io_timeout(limit, async {
            let mut bounded = (&mut *stream).take(MAX_LINE_LEN as u64 + 1);
            bounded.read_until(LINE_TERMINATOR, &mut buf).await
        })
        .await;

        if let Err(e) = read {
            return Err(self.abort(&e));
        }

        if buf.last() != Some(&LINE_TERMINATOR) {
            self.close();
            if buf.len() > MAX_LINE_LEN {
                return Err(Error::MalformedResponse(format!(
                    "line exceeds {MAX_LINE_LEN} bytes"
                )));
            }
            return Err(Error::closed(if buf.is_empty() {
                "peer closed the connection"
            } else {
                "peer closed the connection mid-line"
            }));
        }

        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }

        let line = String::from_utf8(buf)
            .map_err(|e| Error::MalformedResponse(format!("line is not UTF-8: {e}")))?;
        trace!(peer = %self.peer, "<- {}", line);
        Ok(line)
    }

    /// Receive exactly `n` bytes.
    ///
    /// Memory grows with the data actually received, at most
    /// [`RECV_CHUNK`] bytes ahead of it, so a large `n` from an untrusted
    /// size field cannot force a huge allocation up front. The I/O timeout
    /// applies to each read.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] if the stream ends first; the partial
    /// data is discarded.
    pub async fn recv_exact(&mut self, n: usize) -> Result<Bytes> {
        let limit = self.io_timeout;
        let stream = self.stream_mut()?;
        let mut buf = BytesMut::with_capacity(n.min(RECV_CHUNK));

        while buf.len() < n {
            let want = n - buf.len();
            buf.reserve(want.min(RECV_CHUNK));
            let mut bounded = (&mut *stream).take(want as u64);
            let read = with_io_timeout(limit, bounded.read_buf(&mut buf)).await;
            match read {
                Ok(0) => {
                    self.close();
                    return Err(Error::closed("peer closed the connection"));
                }
                Ok(_) => {}
                Err(e) => return Err(self.abort(&e)),
            }
        }
        Ok(buf.freeze())
    }

    /// Write all of `bytes`.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] if the connection breaks mid-write.
    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let limit = self.io_timeout;
        let stream = self.stream_mut()?.get_mut();
        let written = with_io_timeout(limit, stream.write_all(bytes)).await;
        written.map_err(|e| self.abort(&e))
    }

    /// Encode and send one request line.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if a field cannot be encoded (nothing is
    /// sent), otherwise as [`Transport::send`].
    pub async fn send_request(&mut self, request: &Request) -> Result<()> {
        let line = request.encode()?;
        debug!(peer = %self.peer, "-> {}", request.redacted());
        self.send(line.as_bytes()).await
    }

    /// Receive and parse one status line.
    ///
    /// # Errors
    ///
    /// As [`Transport::recv_line`], plus [`Error::MalformedResponse`] when the
    /// line is not `OK|...` or `ERR|...`.
    pub async fn recv_response(&mut self) -> Result<ProtocolResponse> {
        let line = self.recv_line().await?;
        let response = ProtocolResponse::parse(&line)?;
        debug!(peer = %self.peer, "<- {}", response);
        Ok(response)
    }

    /// Release the socket. Safe to call any number of times.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(event = "transport_closed", peer = %self.peer, "Connection closed");
        }
    }

    fn stream_mut(&mut self) -> Result<&mut BufReader<TcpStream>> {
        self.stream
            .as_mut()
            .ok_or_else(|| Error::closed("transport is closed"))
    }

    fn abort(&mut self, err: &io::Error) -> Error {
        self.close();
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Error::closed("peer closed the connection"),
            io::ErrorKind::TimedOut => Error::closed(format!("no data from {}: {err}", self.peer)),
            _ => Error::closed(err.to_string()),
        }
    }
}

async fn with_io_timeout<F, T>(limit: Option<Duration>, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => timeout(limit, fut).await.unwrap_or_else(|_| {
            Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("I/O timed out after {limit:?}"),
            ))
        }),
        None => fut.await,
    }
}
