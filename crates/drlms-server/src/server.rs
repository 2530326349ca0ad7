//! DRLMS server implementation
//!
//! One task per connection. Each connection is a strict request/reply loop:
//! read a line, answer it (streaming file bytes where the protocol says
//! so), read the next line. Anything that would desynchronize the stream
//! ends the connection instead.

use crate::config::ServerConfig;
use crate::error::Result;
use drlms_core::codec::{self, LINE_TERMINATOR, MAX_LINE_LEN, READY};
use drlms_core::{ProtocolResponse, Request};
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Pause after a failed `accept` (e.g. descriptor exhaustion)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// DRLMS server bound to its listening socket
pub struct Server {
    config: Arc<ServerConfig>,
    listener: TcpListener,
}

impl Server {
    /// Validate the configuration and bind the listener
    ///
    /// # Errors
    ///
    /// [`crate::ServerError::Config`] for an invalid configuration and
    /// [`crate::ServerError::Io`] when the address cannot be bound.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.listen_addr()).await?;
        info!(
            event = "server_listening",
            addr = %listener.local_addr()?,
            root_dir = %config.root_dir.display(),
            users = config.users.len(),
            "DRLMS server listening"
        );
        Ok(Self {
            config: Arc::new(config),
            listener,
        })
    }

    /// Address actually bound (useful with port 0)
    ///
    /// # Errors
    ///
    /// [`crate::ServerError::Io`] if the socket address cannot be queried.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is dropped.
    ///
    /// # Errors
    ///
    /// Accept failures are logged and retried, so no error is returned.
    pub async fn run(self) -> Result<()> {
        let mut next_id = 0u64;
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(event = "accept_failed", error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            next_id += 1;
            let id = next_id;
            let config = Arc::clone(&self.config);

            tokio::spawn(async move {
                info!(event = "connection_opened", id, peer = %peer, "Client connected");
                let mut connection = Connection::new(stream, peer, config, id);
                match connection.serve().await {
                    Ok(()) => info!(event = "connection_closed", id, peer = %peer, "Client disconnected"),
                    Err(e) => warn!(
                        event = "connection_aborted",
                        id,
                        peer = %peer,
                        error = %e,
                        "Connection ended with error"
                    ),
                }
            });
        }
    }
}

struct Connection {
    stream: BufReader<TcpStream>,
    peer: SocketAddr,
    config: Arc<ServerConfig>,
    id: u64,
    user: Option<String>,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr, config: Arc<ServerConfig>, id: u64) -> Self {
        Self {
            stream: BufReader::new(stream),
            peer,
            config,
            id,
            user: None,
        }
    }

    async fn serve(&mut self) -> Result<()> {
        while let Some(line) = self.read_line().await? {
            let request = match Request::parse(&line) {
                Ok(request) => request,
                Err(e) => {
                    debug!(id = self.id, error = %e, "Rejected request line");
                    self.reply(ProtocolResponse::err("bad_request")).await?;
                    continue;
                }
            };
            debug!(id = self.id, "<- {}", request.redacted());

            match request {
                Request::Login { user, password } => self.login(user, &password).await?,
                Request::List => {
                    if self.require_login().await? {
                        self.list().await?;
                    }
                }
                Request::Get { name } => {
                    if self.require_login().await? {
                        self.get(&name).await?;
                    }
                }
                Request::Put { name, size } => {
                    if self.require_login().await? {
                        self.put(&name, size).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Next request line, or `None` once the client has gone away.
    async fn read_line(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let mut bounded = (&mut self.stream).take(MAX_LINE_LEN as u64 + 1);
        bounded.read_until(LINE_TERMINATOR, &mut buf).await?;

        if buf.last() != Some(&LINE_TERMINATOR) {
            if buf.len() > MAX_LINE_LEN {
                self.reply(ProtocolResponse::err("line_too_long")).await?;
            }
            return Ok(None);
        }
        buf.pop();
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    async fn reply(&mut self, response: ProtocolResponse) -> Result<()> {
        debug!(id = self.id, "-> {}", response);
        self.stream
            .get_mut()
            .write_all(response.encode().as_bytes())
            .await?;
        Ok(())
    }

    async fn require_login(&mut self) -> Result<bool> {
        if self.user.is_some() {
            return Ok(true);
        }
        self.reply(ProtocolResponse::err("not_logged_in")).await?;
        Ok(false)
    }

    async fn login(&mut self, user: String, password: &str) -> Result<()> {
        let accepted = self
            .config
            .users
            .get(&user)
            .is_some_and(|expected| expected == password);

        if accepted {
            info!(event = "login_succeeded", id = self.id, peer = %self.peer, user = %user, "User logged in");
            let token = format!("{:08x}", self.id);
            self.user = Some(user);
            self.reply(ProtocolResponse::ok(token)).await
        } else {
            warn!(event = "login_failed", id = self.id, peer = %self.peer, user = %user, "Invalid credentials");
            self.reply(ProtocolResponse::err("invalid_credentials")).await
        }
    }

    async fn list(&mut self) -> Result<()> {
        match list_root(&self.config.root_dir).await {
            Ok(names) => self.reply(ProtocolResponse::ok(codec::encode_names(&names))).await,
            Err(e) => {
                warn!(id = self.id, error = %e, "Failed to list root directory");
                self.reply(ProtocolResponse::err("list_failed")).await
            }
        }
    }

    async fn get(&mut self, name: &str) -> Result<()> {
        let Some(path) = resolve(&self.config.root_dir, name) else {
            return self.reply(ProtocolResponse::err("invalid_name")).await;
        };

        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return self.reply(ProtocolResponse::err("not_found")).await;
            }
            Err(e) => {
                warn!(id = self.id, path = %path.display(), error = %e, "Failed to open file");
                return self.reply(ProtocolResponse::err("read_failed")).await;
            }
        };
        let size = match file.metadata().await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => return self.reply(ProtocolResponse::err("not_found")).await,
            Err(e) => {
                warn!(id = self.id, path = %path.display(), error = %e, "Failed to stat file");
                return self.reply(ProtocolResponse::err("read_failed")).await;
            }
        };

        self.reply(ProtocolResponse::ok(size.to_string())).await?;

        // once the size is announced a short read cannot be reported in-band
        let mut buf = vec![0u8; self.config.chunk_size];
        let mut remaining = size;
        while remaining > 0 {
            let want = chunk_len(remaining, buf.len());
            file.read_exact(&mut buf[..want]).await?;
            self.stream.get_mut().write_all(&buf[..want]).await?;
            remaining -= want as u64;
        }

        info!(event = "download_served", id = self.id, file = name, bytes = size, "File sent");
        Ok(())
    }

    async fn put(&mut self, name: &str, size: u64) -> Result<()> {
        let Some(path) = resolve(&self.config.root_dir, name) else {
            return self.reply(ProtocolResponse::err("invalid_name")).await;
        };
        if self.config.max_file_size.is_some_and(|max| size > max) {
            return self.reply(ProtocolResponse::err("too_large")).await;
        }

        let temp_path = self
            .config
            .root_dir
            .join(format!(".{name}.upload-{}", self.id));
        let file = match File::create(&temp_path).await {
            Ok(file) => file,
            Err(e) => {
                warn!(id = self.id, path = %temp_path.display(), error = %e, "Failed to create upload file");
                return self.reply(ProtocolResponse::err("write_failed")).await;
            }
        };

        self.reply(ProtocolResponse::ok(READY)).await?;

        let write_failure = match self.receive_into(file, size).await {
            Ok(failure) => failure,
            Err(e) => {
                discard(&temp_path).await;
                return Err(e);
            }
        };

        if let Some(e) = write_failure {
            warn!(id = self.id, file = name, error = %e, "Upload could not be stored");
            discard(&temp_path).await;
            return self.reply(ProtocolResponse::err("write_failed")).await;
        }

        if let Err(e) = fs::rename(&temp_path, &path).await {
            warn!(id = self.id, file = name, error = %e, "Failed to move upload into place");
            discard(&temp_path).await;
            return self.reply(ProtocolResponse::err("write_failed")).await;
        }

        info!(event = "upload_stored", id = self.id, file = name, bytes = size, "File stored");
        self.reply(ProtocolResponse::ok(name)).await
    }

    /// Read exactly `size` bytes from the client. A local write failure does
    /// not stop the read: the remaining bytes are drained so the stream stays
    /// aligned, and the failure is handed back for an `ERR` reply.
    async fn receive_into(&mut self, mut file: File, size: u64) -> Result<Option<io::Error>> {
        let mut buf = vec![0u8; self.config.chunk_size];
        let mut remaining = size;
        let mut failure = None;

        while remaining > 0 {
            let want = chunk_len(remaining, buf.len());
            self.stream.read_exact(&mut buf[..want]).await?;
            if failure.is_none() {
                if let Err(e) = file.write_all(&buf[..want]).await {
                    failure = Some(e);
                }
            }
            remaining -= want as u64;
        }

        if failure.is_none() {
            if let Err(e) = file.flush().await {
                failure = Some(e);
            }
        }
        Ok(failure)
    }
}

/// Map a client-supplied name to a path directly inside `root`.
///
/// Only plain names are served: no separators, no parent references and
/// no leading dot (hidden files and in-progress uploads stay invisible).
fn resolve(root: &Path, name: &str) -> Option<PathBuf> {
    if codec::validate_name(name).is_err()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
    {
        return None;
    }
    Some(root.join(name))
}

async fn list_root(root: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if resolve(root, &name).is_some() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

fn chunk_len(remaining: u64, chunk_size: usize) -> usize {
    usize::try_from(remaining).map_or(chunk_size, |left| left.min(chunk_size))
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove partial upload");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_accepts_plain_names() {
        let root = Path::new("/srv/drlms");
        assert_eq!(
            resolve(root, "report.pdf"),
            Some(PathBuf::from("/srv/drlms/report.pdf"))
        );
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let root = Path::new("/srv/drlms");
        for name in ["", "..", "../etc/passwd", "a/b", "a\\b", ".hidden", "a,b", "a|b"] {
            assert!(resolve(root, name).is_none(), "{name:?} must be rejected");
        }
    }

    #[test]
    fn test_chunk_len() {
        assert_eq!(chunk_len(10, 4), 4);
        assert_eq!(chunk_len(3, 4), 3);
        assert_eq!(chunk_len(u64::MAX, 8), 8);
    }

    #[tokio::test]
    async fn test_list_root_skips_dirs_and_hidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join(".a.txt.upload-1"), b"partial").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let names = list_root(dir.path()).await.unwrap();
        assert_eq!(names, ["a.txt", "b.txt"]);
    }
}
