//! Wire-level tests driving the server with a raw socket

use drlms_core::codec::MAX_LINE_LEN;
use drlms_server::{Server, ServerConfig};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

struct Client {
    stream: BufReader<TcpStream>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            stream: BufReader::new(stream),
        }
    }

    async fn send(&mut self, bytes: &[u8]) {
        self.stream.get_mut().write_all(bytes).await.unwrap();
    }

    async fn line(&mut self) -> String {
        let mut line = String::new();
        self.stream.read_line(&mut line).await.unwrap();
        line.trim_end_matches('\n').to_string()
    }

    async fn call(&mut self, request: &str) -> String {
        self.send(format!("{request}\n").as_bytes()).await;
        self.line().await
    }

    async fn logged_in(addr: SocketAddr) -> Self {
        let mut client = Self::connect(addr).await;
        assert!(client.call("LOGIN|alice|password").await.starts_with("OK|"));
        client
    }
}

async fn start(max_file_size: Option<u64>) -> (SocketAddr, TempDir) {
    let root = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        bind_address: "127.0.0.1".to_string(),
        port: 0,
        root_dir: root.path().to_path_buf(),
        users: HashMap::from([("alice".to_string(), "password".to_string())]),
        max_file_size,
        chunk_size: 1000,
        ..ServerConfig::default()
    };
    let server = Server::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    (addr, root)
}

#[tokio::test]
async fn test_requests_before_login_are_refused() {
    let (addr, _root) = start(None).await;
    let mut client = Client::connect(addr).await;

    assert_eq!(client.call("LIST").await, "ERR|not_logged_in");
    assert_eq!(client.call("GET|a.txt").await, "ERR|not_logged_in");
    assert_eq!(client.call("PUT|a.txt|3").await, "ERR|not_logged_in");
}

#[tokio::test]
async fn test_bad_login_keeps_connection() {
    let (addr, _root) = start(None).await;
    let mut client = Client::connect(addr).await;

    assert_eq!(
        client.call("LOGIN|alice|nope").await,
        "ERR|invalid_credentials"
    );
    assert_eq!(
        client.call("LOGIN|mallory|password").await,
        "ERR|invalid_credentials"
    );
    assert!(client.call("LOGIN|alice|password").await.starts_with("OK|"));
    assert_eq!(client.call("LIST").await, "OK|");
}

#[tokio::test]
async fn test_unknown_request() {
    let (addr, _root) = start(None).await;
    let mut client = Client::logged_in(addr).await;

    assert_eq!(client.call("DELETE|a.txt").await, "ERR|bad_request");
    assert_eq!(client.call("PUT|a.txt|-1").await, "ERR|bad_request");
    assert_eq!(client.call("LIST").await, "OK|");
}

#[tokio::test]
async fn test_put_then_get() {
    let (addr, root) = start(None).await;
    let mut client = Client::logged_in(addr).await;
    let body: Vec<u8> = (0..2500u32).map(|i| (i % 256) as u8).collect();

    assert_eq!(client.call("PUT|data.bin|2500").await, "OK|ready");
    client.send(&body).await;
    assert_eq!(client.line().await, "OK|data.bin");
    assert_eq!(std::fs::read(root.path().join("data.bin")).unwrap(), body);

    assert_eq!(client.call("GET|data.bin").await, "OK|2500");
    let mut received = vec![0u8; 2500];
    client.stream.read_exact(&mut received).await.unwrap();
    assert_eq!(received, body);

    // the stream is still aligned on request lines
    assert_eq!(client.call("LIST").await, "OK|data.bin");
}

#[tokio::test]
async fn test_empty_upload() {
    let (addr, root) = start(None).await;
    let mut client = Client::logged_in(addr).await;

    assert_eq!(client.call("PUT|empty.txt|0").await, "OK|ready");
    assert_eq!(client.line().await, "OK|empty.txt");
    assert_eq!(std::fs::metadata(root.path().join("empty.txt")).unwrap().len(), 0);
    assert_eq!(client.call("GET|empty.txt").await, "OK|0");
}

#[tokio::test]
async fn test_listing_is_sorted_regular_files() {
    let (addr, root) = start(None).await;
    std::fs::write(root.path().join("zeta.txt"), b"z").unwrap();
    std::fs::write(root.path().join("alpha.txt"), b"a").unwrap();
    std::fs::write(root.path().join(".hidden"), b"h").unwrap();
    std::fs::create_dir(root.path().join("nested")).unwrap();

    let mut client = Client::logged_in(addr).await;
    assert_eq!(client.call("LIST").await, "OK|alpha.txt,zeta.txt");
}

#[tokio::test]
async fn test_names_escaping_root_are_rejected() {
    let (addr, _root) = start(None).await;
    let mut client = Client::logged_in(addr).await;

    for name in ["..", "../etc/passwd", "sub/file", "sub\\file", ".hidden"] {
        assert_eq!(
            client.call(&format!("GET|{name}")).await,
            "ERR|invalid_name",
            "GET {name}"
        );
        assert_eq!(
            client.call(&format!("PUT|{name}|1")).await,
            "ERR|invalid_name",
            "PUT {name}"
        );
    }
}

#[tokio::test]
async fn test_missing_file() {
    let (addr, _root) = start(None).await;
    let mut client = Client::logged_in(addr).await;
    assert_eq!(client.call("GET|ghost.txt").await, "ERR|not_found");
}

#[tokio::test]
async fn test_upload_size_limit() {
    let (addr, root) = start(Some(10)).await;
    let mut client = Client::logged_in(addr).await;

    assert_eq!(client.call("PUT|big.bin|11").await, "ERR|too_large");
    assert_eq!(client.call("PUT|ok.bin|10").await, "OK|ready");
    client.send(b"0123456789").await;
    assert_eq!(client.line().await, "OK|ok.bin");
    assert!(!root.path().join("big.bin").exists());
}

#[tokio::test]
async fn test_interrupted_upload_leaves_nothing() {
    let (addr, root) = start(None).await;
    let mut client = Client::logged_in(addr).await;

    assert_eq!(client.call("PUT|cut.bin|5000").await, "OK|ready");
    client.send(&[0u8; 1200]).await;
    drop(client);

    // give the connection task time to notice and clean up
    tokio::time::sleep(Duration::from_millis(200)).await;
    let leftovers: Vec<_> = std::fs::read_dir(root.path()).unwrap().collect();
    assert!(leftovers.is_empty(), "found {leftovers:?}");
}

#[tokio::test]
async fn test_over_long_line_closes_connection() {
    let (addr, _root) = start(None).await;
    let mut client = Client::connect(addr).await;

    // exactly one byte over, so the server has read everything before hanging up
    client.send(&vec![b'A'; MAX_LINE_LEN + 1]).await;
    assert_eq!(client.line().await, "ERR|line_too_long");
    assert_eq!(client.line().await, "");
}
