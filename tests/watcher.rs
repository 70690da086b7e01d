//! Watcher Integration Tests
//!
//! Attaches a real filesystem watch and checks that only response-file
//! creations come through.

use std::time::Duration;

use orderflow::ingest::{ResponseWatchConfig, ResponseWatcher, WatchEvent};
use tempfile::TempDir;
use tokio::time::timeout;

#[tokio::test]
async fn test_created_response_file_is_reported() {
    let temp = TempDir::new().unwrap();
    let watcher = ResponseWatcher::with_config(ResponseWatchConfig::new(
        "CT",
        temp.path().to_path_buf(),
        "json",
    ));

    let (mut events, handle) = watcher.watch().unwrap();
    assert_eq!(handle.modality(), "CT");

    // Noise first: ignored extension, hidden temp file, a directory
    std::fs::write(temp.path().join("readme.txt"), b"hello").unwrap();
    std::fs::write(temp.path().join(".ORD1.json.tmp"), b"{}").unwrap();
    std::fs::create_dir(temp.path().join("processed")).unwrap();
    std::fs::write(temp.path().join("ORD1.json"), b"{}").unwrap();

    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no watcher event within 5s")
        .expect("watcher channel closed");

    match event {
        WatchEvent::Response(response) => {
            assert_eq!(response.file_name, "ORD1.json");
            assert_eq!(response.order_id, "ORD1");
            assert_eq!(response.modality, "CT");
        }
        WatchEvent::Error(e) => panic!("unexpected watcher error: {}", e),
    }

    // Rewriting the same file is a modification, not a new delivery
    std::fs::write(temp.path().join("ORD1.json"), b"{\"status\":\"done\"}").unwrap();
    let next = timeout(Duration::from_millis(500), events.recv()).await;
    assert!(next.is_err(), "modification should not be reported");

    drop(handle);
}

#[tokio::test]
async fn test_channel_closes_when_handle_dropped() {
    let temp = TempDir::new().unwrap();
    let watcher = ResponseWatcher::with_config(ResponseWatchConfig::new(
        "DX",
        temp.path().to_path_buf(),
        "json",
    ));

    let (mut events, handle) = watcher.watch().unwrap();
    drop(handle);

    let closed = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("channel did not close");
    assert!(closed.is_none());
}
