//! DownloadCoordinator against a local HTTP server.

mod common;

use common::{body, wait_until, TestServer, BODY_LEN};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use trivia_opponent::llm::download::{DownloadCoordinator, DownloadProgress};
use trivia_opponent::llm::model_manager::partial_path_for;
use trivia_opponent::OpponentError;

fn coordinator() -> DownloadCoordinator {
    DownloadCoordinator::new(Duration::from_secs(5), Duration::from_millis(10)).unwrap()
}

#[tokio::test]
async fn fresh_download_lands_at_destination() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("models").join("m.gguf");

    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();
    let path = coordinator()
        .ensure_file(&server.url("/model.bin"), &dest, move |p| {
            sink.lock().unwrap().push(p)
        })
        .await
        .unwrap();

    assert_eq!(path, dest);
    assert_eq!(std::fs::read(&dest).unwrap(), body());
    assert!(!partial_path_for(&dest).exists());
    assert_eq!(server.requests()[0].range, None);

    let reports = reports.lock().unwrap();
    assert!(reports.iter().all(|p| p.bytes_total == Some(BODY_LEN as u64)));
    assert_eq!(
        reports.last().and_then(|p| p.fraction()),
        Some(1.0),
        "last report should be complete"
    );
}

#[tokio::test]
async fn existing_destination_makes_no_request() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("m.gguf");
    std::fs::write(&dest, b"already here").unwrap();

    let mut reports = Vec::new();
    coordinator()
        .ensure_file(&server.url("/model.bin"), &dest, |p| reports.push(p))
        .await
        .unwrap();

    assert!(server.requests().is_empty());
    assert_eq!(reports, vec![DownloadProgress::complete(12)]);
    assert_eq!(reports[0].fraction(), Some(1.0));
}

#[tokio::test]
async fn concurrent_requests_share_one_transfer() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("m.gguf");
    let downloads = coordinator();
    let url = server.url("/slow.bin");

    let (a, b) = tokio::join!(
        downloads.ensure_file(&url, &dest, |_| {}),
        downloads.ensure_file(&url, &dest, |_| {}),
    );

    assert_eq!(a.unwrap(), dest);
    assert_eq!(b.unwrap(), dest);
    assert_eq!(server.hits("/slow.bin"), 1);
    assert_eq!(std::fs::read(&dest).unwrap().len(), BODY_LEN);
    assert!(!downloads.is_active(&dest));
}

#[tokio::test]
async fn partial_file_resumes_with_range_request() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("m.gguf");
    let resume_at = 10_000;
    std::fs::write(partial_path_for(&dest), &body()[..resume_at]).unwrap();

    coordinator()
        .ensure_file(&server.url("/model.bin"), &dest, |_| {})
        .await
        .unwrap();

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].range.as_deref(), Some("bytes=10000-"));
    assert_eq!(std::fs::metadata(&dest).unwrap().len(), BODY_LEN as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), body());
}

#[tokio::test]
async fn server_ignoring_range_restarts_from_zero() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("m.gguf");
    std::fs::write(partial_path_for(&dest), vec![0xAA; 5_000]).unwrap();

    coordinator()
        .ensure_file(&server.url("/norange.bin"), &dest, |_| {})
        .await
        .unwrap();

    assert_eq!(server.requests()[0].range.as_deref(), Some("bytes=5000-"));
    assert_eq!(std::fs::read(&dest).unwrap(), body());
}

#[tokio::test]
async fn misaligned_partial_response_restarts_from_zero() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("m.gguf");
    std::fs::write(partial_path_for(&dest), &body()[..10_000]).unwrap();

    coordinator()
        .ensure_file(&server.url("/shifted.bin"), &dest, |_| {})
        .await
        .unwrap();

    let ranges: Vec<_> = server.requests().into_iter().map(|r| r.range).collect();
    assert_eq!(ranges, vec![Some("bytes=10000-".to_string()), None]);
    assert_eq!(std::fs::read(&dest).unwrap(), body());
}

#[tokio::test]
async fn redirects_are_followed() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("m.gguf");

    coordinator()
        .ensure_file(&server.url("/redirect"), &dest, |_| {})
        .await
        .unwrap();

    assert_eq!(server.hits("/redirect"), 1);
    assert_eq!(server.hits("/model.bin"), 1);
    assert_eq!(std::fs::read(&dest).unwrap(), body());
}

#[tokio::test]
async fn error_status_is_network_error() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("m.gguf");

    let err = coordinator()
        .ensure_file(&server.url("/missing.bin"), &dest, |_| {})
        .await
        .unwrap_err();

    assert!(matches!(err, OpponentError::Network(ref m) if m.contains("404")), "{err:?}");
    assert!(!dest.exists());
}

#[tokio::test]
async fn short_body_keeps_partial_for_resume() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("m.gguf");

    let err = coordinator()
        .ensure_file(&server.url("/truncated.bin"), &dest, |_| {})
        .await
        .unwrap_err();

    assert!(matches!(err, OpponentError::Network(_)), "{err:?}");
    assert!(!dest.exists());
    let partial = std::fs::metadata(partial_path_for(&dest)).unwrap().len();
    assert_eq!(partial, (BODY_LEN / 2) as u64);
}

#[tokio::test]
async fn unknown_length_reports_indeterminate_progress() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("m.gguf");

    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();
    coordinator()
        .ensure_file(&server.url("/chunked.bin"), &dest, move |p| {
            sink.lock().unwrap().push(p)
        })
        .await
        .unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), body());
    let reports = reports.lock().unwrap();
    assert!(!reports.is_empty());
    // Nothing is known about the total until the body ends
    assert!(reports
        .iter()
        .filter(|p| p.bytes_written < BODY_LEN as u64)
        .all(|p| p.bytes_total.is_none() && p.fraction().is_none()));
    assert_eq!(reports.last().and_then(|p| p.fraction()), Some(1.0));
}

#[tokio::test]
async fn cancel_keeps_partial_and_allows_resume() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("m.gguf");
    let downloads = coordinator();

    let seen = Arc::new(AtomicU64::new(0));
    let task = {
        let downloads = downloads.clone();
        let url = server.url("/slow.bin");
        let dest = dest.clone();
        let seen = seen.clone();
        tokio::spawn(async move {
            downloads
                .ensure_file(&url, &dest, move |p| seen.store(p.bytes_written, Ordering::SeqCst))
                .await
        })
    };

    wait_until(|| seen.load(Ordering::SeqCst) >= 4096).await;
    assert!(downloads.cancel(&dest));

    let result = task.await.unwrap();
    assert_eq!(result, Err(OpponentError::Cancelled));
    assert!(!dest.exists());
    let kept = std::fs::metadata(partial_path_for(&dest)).unwrap().len();
    assert!(kept >= 4096, "partial has {kept} bytes");

    // A later call picks up where the cancelled one stopped
    downloads
        .ensure_file(&server.url("/model.bin"), &dest, |_| {})
        .await
        .unwrap();
    let resumed = server
        .requests()
        .into_iter()
        .find(|r| r.path == "/model.bin")
        .unwrap();
    assert_eq!(resumed.range, Some(format!("bytes={}-", kept)));
    assert_eq!(std::fs::read(&dest).unwrap(), body());
}
