//! Shared fixtures: a real server on an ephemeral port and scripted peers
//! for fault injection.

#![allow(dead_code)]

use drlms_client::{Session, SessionOptions};
use drlms_server::{Server, ServerConfig};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub const USER: &str = "alice";
pub const PASSWORD: &str = "password";

pub struct TestServer {
    pub addr: SocketAddr,
    pub root: TempDir,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub fn path(&self, name: &str) -> std::path::PathBuf {
        self.root.path().join(name)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn start_server() -> TestServer {
    let root = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        bind_address: "127.0.0.1".to_string(),
        port: 0,
        root_dir: root.path().to_path_buf(),
        chunk_size: 4096,
        ..ServerConfig::default()
    };
    let server = Server::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let _ = server.run().await;
    });
    TestServer { addr, root, handle }
}

pub fn small_chunks() -> SessionOptions {
    SessionOptions {
        chunk_size: 1024,
        io_timeout: Some(Duration::from_secs(10)),
        ..SessionOptions::default()
    }
}

pub async fn login(addr: SocketAddr) -> Session {
    Session::login_with_options(
        &addr.ip().to_string(),
        addr.port(),
        USER,
        PASSWORD,
        small_chunks(),
    )
    .await
    .unwrap()
}

/// Deterministic, non-repeating-looking test payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

pub fn write_file(dir: &Path, name: &str, contents: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// One-connection peer for fault injection.
pub struct ScriptedPeer {
    pub reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    pub writer: OwnedWriteHalf,
}

impl ScriptedPeer {
    pub async fn expect_line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line.trim_end_matches('\n').to_string()
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    /// Accept the `LOGIN` line and approve it
    pub async fn accept_login(&mut self) {
        let line = self.expect_line().await;
        assert!(line.starts_with("LOGIN|"), "unexpected first line {line:?}");
        self.send(b"OK|token\n").await;
    }
}

/// Bind a listener and hand the single accepted connection to `script`.
pub async fn scripted<F, Fut>(script: F) -> (SocketAddr, JoinHandle<()>)
where
    F: FnOnce(ScriptedPeer) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        script(split(stream)).await;
    });
    (addr, handle)
}

fn split(stream: TcpStream) -> ScriptedPeer {
    let (read, writer) = stream.into_split();
    ScriptedPeer {
        reader: BufReader::new(read),
        writer,
    }
}
