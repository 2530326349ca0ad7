//! Upload, download and listing against the reference server

mod common;

use common::{login, payload, start_server, write_file};
use drlms_client::{progress_channel, Error, NoProgress, OperationError, ProtocolResponse};

async fn round_trip(len: usize) {
    let server = start_server().await;
    let local = tempfile::tempdir().unwrap();
    let data = payload(len);
    let source = write_file(local.path(), "blob.bin", &data);

    let mut session = login(server.addr).await;

    let mut uploads = Vec::new();
    let reply = session
        .upload_file(&source, |sent: u64, total: u64| uploads.push((sent, total)))
        .await
        .unwrap();
    assert_eq!(reply, ProtocolResponse::ok("blob.bin"));
    assert_eq!(std::fs::read(server.path("blob.bin")).unwrap(), data);

    let target = local.path().join("copy.bin");
    let mut downloads = Vec::new();
    let reply = session
        .download_file("blob.bin", &target, |got: u64, total: u64| {
            downloads.push((got, total));
        })
        .await
        .unwrap();
    assert_eq!(reply, ProtocolResponse::ok(len.to_string()));
    assert_eq!(std::fs::read(&target).unwrap(), data);
    assert!(!local.path().join("copy.bin.part").exists());

    for reports in [&uploads, &downloads] {
        assert!(!reports.is_empty());
        assert!(reports.windows(2).all(|w| w[0].0 <= w[1].0));
        assert!(reports.iter().all(|&(_, total)| total == len as u64));
        assert_eq!(reports.last().copied(), Some((len as u64, len as u64)));
    }

    assert!(session.is_authenticated());
    session.reset();
}

#[tokio::test]
async fn test_round_trip_empty_file() {
    round_trip(0).await;
}

#[tokio::test]
async fn test_round_trip_single_byte() {
    round_trip(1).await;
}

#[tokio::test]
async fn test_round_trip_many_chunks() {
    round_trip(10 * 1024 + 1).await;
}

#[tokio::test]
async fn test_progress_counts_chunks() {
    let server = start_server().await;
    let local = tempfile::tempdir().unwrap();
    let source = write_file(local.path(), "chunks.bin", &payload(3 * 1024));

    let mut session = login(server.addr).await;
    let mut reports = Vec::new();
    session
        .upload_file(&source, |sent: u64, _: u64| reports.push(sent))
        .await
        .unwrap();
    assert_eq!(reports, [1024, 2048, 3072]);
}

#[tokio::test]
async fn test_watch_progress_sees_completion() {
    let server = start_server().await;
    let local = tempfile::tempdir().unwrap();
    let source = write_file(local.path(), "watched.bin", &payload(5000));

    let mut session = login(server.addr).await;
    let (reporter, rx) = progress_channel();
    session.upload_file(&source, reporter).await.unwrap();

    let last = *rx.borrow();
    assert_eq!((last.transferred, last.total), (5000, 5000));
    assert!(last.is_complete());
}

#[tokio::test]
async fn test_empty_listing() {
    let server = start_server().await;
    let mut session = login(server.addr).await;

    let entries = session.list_files().await.unwrap();
    assert!(entries.is_empty());
    assert!(session.is_authenticated());
}

#[tokio::test]
async fn test_listing_after_uploads() {
    let server = start_server().await;
    let local = tempfile::tempdir().unwrap();
    let b = write_file(local.path(), "b.txt", b"b");
    let a = write_file(local.path(), "a.txt", b"a");

    let mut session = login(server.addr).await;
    session.upload_file(&b, NoProgress).await.unwrap();
    session.upload_file(&a, NoProgress).await.unwrap();
    session
        .upload_file_as(&a, "renamed.txt", NoProgress)
        .await
        .unwrap();

    let names: Vec<String> = session
        .list_files()
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    assert_eq!(names, ["a.txt", "b.txt", "renamed.txt"]);
}

#[tokio::test]
async fn test_missing_local_file_leaves_session_usable() {
    let server = start_server().await;
    let local = tempfile::tempdir().unwrap();
    let mut session = login(server.addr).await;

    let missing = local.path().join("does-not-exist.txt");
    let err = session.upload_file(&missing, NoProgress).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Operation(OperationError::FileNotFound(ref path)) if *path == missing
    ));

    assert!(session.is_authenticated());
    assert!(session.list_files().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_download_missing_remote_file() {
    let server = start_server().await;
    let local = tempfile::tempdir().unwrap();
    let target = local.path().join("nothing.txt");
    let mut session = login(server.addr).await;

    let err = session
        .download_file("nothing.txt", &target, NoProgress)
        .await
        .unwrap_err();
    assert_eq!(err.server_reason(), Some("not_found"));
    assert!(!target.exists());
    assert!(!local.path().join("nothing.txt.part").exists());

    assert!(session.is_authenticated());
    session.list_files().await.unwrap();
}

#[tokio::test]
async fn test_server_rejects_path_escape() {
    let server = start_server().await;
    let local = tempfile::tempdir().unwrap();
    let source = write_file(local.path(), "x.txt", b"x");
    let mut session = login(server.addr).await;

    let err = session
        .upload_file_as(&source, "../x.txt", NoProgress)
        .await
        .unwrap_err();
    assert_eq!(err.server_reason(), Some("invalid_name"));
    assert!(session.is_authenticated());
}

#[tokio::test]
async fn test_reserved_name_rejected_before_sending() {
    let server = start_server().await;
    let local = tempfile::tempdir().unwrap();
    let source = write_file(local.path(), "x.txt", b"x");
    let mut session = login(server.addr).await;

    let err = session
        .upload_file_as(&source, "a|b", NoProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(session.is_authenticated());
    assert!(session.list_files().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_download_overwrites_existing_target() {
    let server = start_server().await;
    std::fs::write(server.path("fresh.txt"), b"new contents").unwrap();
    let local = tempfile::tempdir().unwrap();
    let target = write_file(local.path(), "fresh.txt", b"stale");

    let mut session = login(server.addr).await;
    session
        .download_file("fresh.txt", &target, NoProgress)
        .await
        .unwrap();
    assert_eq!(std::fs::read(&target).unwrap(), b"new contents");
}

#[tokio::test]
async fn test_operations_on_empty_session() {
    let mut session = drlms_client::Session::new();
    assert!(matches!(
        session.list_files().await,
        Err(Error::NotConnected)
    ));
}
