mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use motion_keep::{
    FrameService, HttpFetcher, ServiceSettings, SqliteFrameStore, StreamError,
};

use common::SnapshotServer;

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    done()
}

fn service(dir: &std::path::Path) -> FrameService {
    let store = Arc::new(SqliteFrameStore::open_in_memory(dir).unwrap());
    FrameService::new(
        store,
        Arc::new(HttpFetcher::new(Duration::from_secs(2))),
        ServiceSettings::default(),
    )
}

#[test]
fn polls_http_source_until_stopped() {
    let server = SnapshotServer::start();
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());

    let info = service.start_stream("porch", &server.url(), 0.5).unwrap();
    assert_eq!(info.interval_secs, 0.5);

    assert!(wait_until(|| service.stats().frames_ingested >= 2));
    let streams = service.list_active_streams().unwrap();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].url, server.url());
    assert!(streams[0].frames_ingested >= 2);
    assert_eq!(streams[0].fetch_failures, 0);

    service.stop_stream("porch").unwrap();
    assert!(service.list_active_streams().unwrap().is_empty());

    // Nothing arrives once stop has returned.
    let ingested = service.stats().frames_ingested;
    let requests = server.requests.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(1_200));
    assert_eq!(service.stats().frames_ingested, ingested);
    assert_eq!(server.requests.load(Ordering::SeqCst), requests);
    assert!(service.recent_frames(100).unwrap().len() as u64 >= 2);
}

#[test]
fn unreachable_source_keeps_polling() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());
    let dead_addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    service
        .start_stream("dead", &format!("http://{}/snap.jpg", dead_addr), 0.5)
        .unwrap();
    assert!(wait_until(|| service.stats().fetch_failures >= 2));
    let streams = service.list_active_streams().unwrap();
    assert!(streams[0].last_error.is_some());
    assert_eq!(streams[0].frames_ingested, 0);
    service.stop_stream("dead").unwrap();
}

#[test]
fn lifecycle_misuse_is_rejected() {
    let server = SnapshotServer::start();
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());

    service.start_stream("cam", &server.url(), 30.0).unwrap();
    assert!(matches!(
        service.start_stream("cam", &server.url(), 30.0),
        Err(StreamError::DuplicateName(_))
    ));
    assert!(matches!(
        service.start_stream("other", "rtsp://cam/live", 1.0),
        Err(StreamError::InvalidUrl { .. })
    ));
    assert!(matches!(
        service.stop_stream("ghost"),
        Err(StreamError::NotFound(_))
    ));

    let started = Instant::now();
    service.shutdown().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(service.list_active_streams().unwrap().is_empty());
}

#[test]
fn streams_are_independent() {
    let server_a = SnapshotServer::start();
    let server_b = SnapshotServer::start();
    let dir = tempfile::tempdir().unwrap();
    let service = service(dir.path());

    service.start_stream("a", &server_a.url(), 0.5).unwrap();
    service.start_stream("b", &server_b.url(), 0.5).unwrap();
    assert!(wait_until(|| {
        service
            .list_active_streams()
            .unwrap()
            .iter()
            .all(|info| info.frames_ingested >= 1)
    }));

    service.stop_stream("a").unwrap();
    let before = server_b.requests.load(Ordering::SeqCst);
    assert!(wait_until(|| server_b.requests.load(Ordering::SeqCst) > before));
    service.shutdown().unwrap();
}
