//! File listing and transfer operations
//!
//! Each operation claims the session's transport for one exchange. A
//! server `ERR` leaves the session usable; anything that loses track of the
//! byte stream (peer gone, local read/write failure mid-stream) closes the
//! transport and the session must be reset.
//!
//! Downloads are written to `<target>.part` and renamed into place only
//! once every byte has arrived. On failure (or if the download future is
//! dropped) the part file is removed, so the target path never holds a
//! truncated download.

use crate::error::{Error, OperationError, Result};
use crate::progress::ProgressReporter;
use crate::session::Session;
use crate::transport::Transport;
use drlms_core::codec::{self, READY};
use drlms_core::{FileEntry, ProtocolResponse, Request};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Suffix appended to a download target while bytes are arriving
pub const PART_SUFFIX: &str = ".part";

impl Session {
    /// List the server's files in the order the server sent them.
    ///
    /// # Errors
    ///
    /// [`OperationError::ServerRejected`] on `ERR`, plus the session-level
    /// errors ([`Error::NotConnected`], [`Error::ConnectionClosed`],
    /// [`Error::MalformedResponse`]).
    pub async fn list_files(&mut self) -> Result<Vec<FileEntry>> {
        let mut exchange = self.begin_exchange()?;
        let result = list_exchange(exchange.transport()).await;
        exchange.finish(result)
    }

    /// Upload `local_path` under its own file name.
    ///
    /// # Errors
    ///
    /// See [`Session::upload_file_as`].
    pub async fn upload_file(
        &mut self,
        local_path: impl AsRef<Path>,
        progress: impl ProgressReporter,
    ) -> Result<ProtocolResponse> {
        let local_path = local_path.as_ref();
        let name = local_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "{} has no UTF-8 file name",
                    local_path.display()
                ))
            })?;
        self.upload_file_as(local_path, name, progress).await
    }

    /// Upload `local_path` and store it as `remote_name`.
    ///
    /// Returns the server's final status line. A final `ERR` (the server got
    /// the bytes but would not keep them) is returned as
    /// [`ProtocolResponse::Err`] and the session stays usable.
    ///
    /// # Errors
    ///
    /// - [`OperationError::FileNotFound`] / [`OperationError::ReadError`] if
    ///   the local file cannot be opened; the session is untouched
    /// - [`OperationError::ServerRejected`] if the server refuses the `PUT`
    ///   before any byte is sent; the session stays usable
    /// - [`OperationError::ReadError`] if reading fails mid-stream; the
    ///   transport is closed
    /// - [`Error::ConnectionClosed`] if the peer goes away
    pub async fn upload_file_as(
        &mut self,
        local_path: impl AsRef<Path>,
        remote_name: &str,
        mut progress: impl ProgressReporter,
    ) -> Result<ProtocolResponse> {
        let local_path = local_path.as_ref();
        codec::validate_name(remote_name)?;
        let (file, size) = open_source(local_path).await?;

        let job = Job {
            local_path,
            remote_name,
            chunk_size: self.chunk_size(),
        };
        let mut exchange = self.begin_exchange()?;
        let result = upload_exchange(exchange.transport(), file, size, &job, &mut progress).await;
        exchange.finish(result)
    }

    /// Download `remote_name` into `local_path`.
    ///
    /// Returns the server's `OK|<size>` reply once the file is complete on
    /// disk.
    ///
    /// # Errors
    ///
    /// - [`OperationError::ServerRejected`] on `ERR`; the session stays usable
    /// - [`OperationError::WriteError`] if `<local_path>.part` already exists
    ///   or cannot be created (nothing is sent), or if writing fails once
    ///   bytes are in flight (the transport is closed)
    /// - [`Error::ConnectionClosed`] if the peer goes away mid-transfer
    /// - [`Error::MalformedResponse`] if the size field is garbage; the
    ///   transport is closed
    pub async fn download_file(
        &mut self,
        remote_name: &str,
        local_path: impl AsRef<Path>,
        mut progress: impl ProgressReporter,
    ) -> Result<ProtocolResponse> {
        let local_path = local_path.as_ref();
        codec::validate_name(remote_name)?;

        if !self.is_authenticated() {
            return Err(Error::NotConnected);
        }
        let (mut part, file) =
            PartFile::create(local_path)
                .await
                .map_err(|source| OperationError::WriteError {
                    path: part_path(local_path),
                    source,
                })?;

        let job = Job {
            local_path,
            remote_name,
            chunk_size: self.chunk_size(),
        };
        let mut exchange = self.begin_exchange()?;
        let result =
            download_exchange(exchange.transport(), file, &part.path, &job, &mut progress).await;
        if result.is_ok() {
            part.keep();
        }
        exchange.finish(result)
    }
}

struct Job<'a> {
    local_path: &'a Path,
    remote_name: &'a str,
    chunk_size: usize,
}

async fn list_exchange(transport: &mut Transport) -> Result<Vec<FileEntry>> {
    transport.send_request(&Request::List).await?;
    match transport.recv_response().await? {
        ProtocolResponse::Ok(payload) => {
            let entries = codec::parse_names(&payload);
            debug!(count = entries.len(), "Listed remote files");
            Ok(entries)
        }
        ProtocolResponse::Err(reason) => Err(OperationError::ServerRejected(reason).into()),
    }
}

async fn open_source(path: &Path) -> Result<(File, u64)> {
    let read_error = |source| OperationError::ReadError {
        path: path.to_path_buf(),
        source,
    };

    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(OperationError::FileNotFound(path.to_path_buf()).into());
        }
        Err(e) => return Err(read_error(e).into()),
    };
    let metadata = file.metadata().await.map_err(read_error)?;
    if metadata.is_dir() {
        return Err(read_error(io::Error::other("is a directory")).into());
    }
    Ok((file, metadata.len()))
}

async fn upload_exchange<P: ProgressReporter>(
    transport: &mut Transport,
    mut file: File,
    size: u64,
    job: &Job<'_>,
    progress: &mut P,
) -> Result<ProtocolResponse> {
    transport
        .send_request(&Request::Put {
            name: job.remote_name.to_string(),
            size,
        })
        .await?;

    // the server may be waiting for bytes we will never send
    let ready = match transport.recv_response().await {
        Err(e @ Error::MalformedResponse(_)) => {
            transport.close();
            return Err(e);
        }
        other => other?,
    };
    match ready {
        ProtocolResponse::Ok(payload) if payload != READY => {
            debug!(payload = %payload, "Unexpected readiness payload, continuing");
        }
        ProtocolResponse::Ok(_) => {}
        ProtocolResponse::Err(reason) => {
            warn!(event = "upload_rejected", name = job.remote_name, reason = %reason, "Upload rejected");
            return Err(OperationError::ServerRejected(reason).into());
        }
    }

    let mut buf = vec![0u8; job.chunk_size];
    let mut sent = 0u64;
    while sent < size {
        let want = usize::try_from(size - sent).map_or(buf.len(), |left| left.min(buf.len()));
        let chunk = &mut buf[..want];
        if let Err(e) = file.read_exact(chunk).await {
            transport.close();
            let source = if e.kind() == io::ErrorKind::UnexpectedEof {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("file shrank during upload ({sent} of {size} bytes read)"),
                )
            } else {
                e
            };
            return Err(OperationError::ReadError {
                path: job.local_path.to_path_buf(),
                source,
            }
            .into());
        }
        transport.send(chunk).await?;
        sent += want as u64;
        progress.report(sent, size);
    }
    if size == 0 {
        progress.report(0, 0);
    }

    let reply = transport.recv_response().await?;
    match &reply {
        ProtocolResponse::Ok(_) => info!(
            event = "upload_complete",
            name = job.remote_name,
            bytes = size,
            "Upload complete"
        ),
        ProtocolResponse::Err(reason) => warn!(
            event = "upload_not_stored",
            name = job.remote_name,
            reason = %reason,
            "Server did not store upload"
        ),
    }
    Ok(reply)
}

async fn download_exchange<P: ProgressReporter>(
    transport: &mut Transport,
    mut file: File,
    part_path: &Path,
    job: &Job<'_>,
    progress: &mut P,
) -> Result<ProtocolResponse> {
    let write_error = |source| OperationError::WriteError {
        path: job.local_path.to_path_buf(),
        source,
    };

    transport
        .send_request(&Request::Get {
            name: job.remote_name.to_string(),
        })
        .await?;

    let payload = match transport.recv_response().await {
        Ok(ProtocolResponse::Ok(payload)) => payload,
        Ok(ProtocolResponse::Err(reason)) => {
            return Err(OperationError::ServerRejected(reason).into());
        }
        Err(e @ Error::MalformedResponse(_)) => {
            transport.close();
            return Err(e);
        }
        Err(e) => return Err(e),
    };
    let size = match codec::parse_size(&payload) {
        Ok(size) => size,
        Err(e) => {
            // an unknown number of bytes is about to follow
            transport.close();
            return Err(e.into());
        }
    };

    let mut received = 0u64;
    while received < size {
        let want = usize::try_from(size - received)
            .map_or(job.chunk_size, |left| left.min(job.chunk_size));
        let chunk = transport.recv_exact(want).await?;
        if let Err(e) = file.write_all(&chunk).await {
            transport.close();
            return Err(write_error(e).into());
        }
        received += want as u64;
        progress.report(received, size);
    }
    if size == 0 {
        progress.report(0, 0);
    }

    file.flush().await.map_err(write_error)?;
    drop(file);
    fs::rename(part_path, job.local_path)
        .await
        .map_err(write_error)?;

    info!(
        event = "download_complete",
        name = job.remote_name,
        bytes = size,
        path = %job.local_path.display(),
        "Download complete"
    );
    Ok(ProtocolResponse::Ok(payload))
}

fn part_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

/// A part file created by this download. Removed on drop unless the
/// download completed, which also covers a download future dropped
/// mid-transfer.
struct PartFile {
    path: PathBuf,
    armed: bool,
}

impl PartFile {
    /// Create `<target>.part`. Fails with `AlreadyExists` rather than touch a
    /// file this call did not create.
    async fn create(target: &Path) -> io::Result<(Self, File)> {
        let path = part_path(target);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        Ok((Self { path, armed: true }, file))
    }

    fn keep(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed incomplete download"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove incomplete download"
            ),
        }
    }
}
