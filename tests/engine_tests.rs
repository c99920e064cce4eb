//! End-to-end engine tests against an in-memory origin.

mod support;

use pretty_assertions::assert_eq;
use std::sync::Arc;

use accelara::{AccelaraError, DownloadEngine, EngineMode};
use support::{sha256_hex, spawn_origin, test_body, test_job, CollectingReporter, RangePolicy};

const MIB: usize = 1024 * 1024;

#[tokio::test]
async fn test_happy_segmented_download() {
    let body = test_body(10 * MIB);
    let (_server, url, ranges) = spawn_origin(body.clone(), RangePolicy::Honor).await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("payload.bin");

    let mut job = test_job(&url, out.clone());
    job.concurrency = 4;
    job.min_chunk_size = MIB as u64;

    let reporter = Arc::new(CollectingReporter::default());
    let engine = DownloadEngine::new(job, reporter.clone()).unwrap();
    let outcome = engine.run().await.unwrap();

    assert_eq!(outcome.size, body.len() as u64);
    assert!(!outcome.resumed);
    assert_eq!(tokio::fs::read(&out).await.unwrap(), body);

    // ceil(10 MiB / 4) = 2.5 MiB per chunk
    let chunk_ranges: Vec<(u64, u64)> = ranges.lock().unwrap().iter().flatten().copied().collect();
    let chunk_len = (10 * MIB as u64).div_ceil(4);
    assert!(chunk_ranges.contains(&(0, chunk_len - 1)));
    assert!(chunk_ranges.contains(&(3 * chunk_len, 10 * MIB as u64 - 1)));

    // The temp area is gone after a successful publish
    assert!(!dir.path().join(".accelara-temp-payload.bin").exists());

    let terminal = reporter.terminal().unwrap();
    assert_eq!(terminal["status"], "completed");
    assert_eq!(terminal["downloaded"], body.len() as u64);
    assert_eq!(terminal["progress"], 1.0);
    assert_eq!(terminal["verify_status"], "size_verified");

    // Progress never overshoots on the wire
    for record in reporter.records() {
        if let Some(progress) = record.get("progress").and_then(|p| p.as_f64()) {
            assert!((0.0..=1.0).contains(&progress));
        }
    }
}

#[tokio::test]
async fn test_checksum_verified_download() {
    let body = test_body(256 * 1024);
    let (_server, url, _ranges) = spawn_origin(body.clone(), RangePolicy::Honor).await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("payload.bin");

    let mut job = test_job(&url, out.clone());
    job.expected_sha256 = Some(sha256_hex(&body));

    let reporter = Arc::new(CollectingReporter::default());
    let engine = DownloadEngine::new(job, reporter.clone()).unwrap();
    engine.run().await.unwrap();

    let terminal = reporter.terminal().unwrap();
    assert_eq!(terminal["status"], "completed");
    assert_eq!(terminal["verify_status"], "checksum_verified");
    assert_eq!(terminal["sha256"], sha256_hex(&body).as_str());
}

#[tokio::test]
async fn test_checksum_mismatch_removes_artifact() {
    let body = test_body(64 * 1024);
    let (_server, url, _ranges) = spawn_origin(body, RangePolicy::Honor).await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("payload.bin");

    let mut job = test_job(&url, out.clone());
    job.expected_sha256 = Some("0".repeat(64));

    let reporter = Arc::new(CollectingReporter::default());
    let engine = DownloadEngine::new(job, reporter.clone()).unwrap();
    let err = engine.run().await.unwrap_err();

    assert!(matches!(err, AccelaraError::ChecksumMismatch { .. }));
    assert!(!out.exists(), "corrupt artifact must not be published");

    let terminal = reporter.terminal().unwrap();
    assert_eq!(terminal["status"], "error");
    assert_eq!(terminal["type"], "error");
}

#[tokio::test]
async fn test_existing_complete_file_fast_path() {
    let body = test_body(32 * 1024);
    let (server, url, ranges) = spawn_origin(body.clone(), RangePolicy::Honor).await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("payload.bin");
    tokio::fs::write(&out, &body).await.unwrap();

    let mut job = test_job(&url, out.clone());
    job.expected_sha256 = Some(sha256_hex(&body));

    let reporter = Arc::new(CollectingReporter::default());
    let engine = DownloadEngine::new(job, reporter.clone()).unwrap();
    let outcome = engine.run().await.unwrap();

    assert_eq!(outcome.size, body.len() as u64);
    assert!(ranges.lock().unwrap().is_empty(), "no network reads expected");
    drop(server);

    let statuses = reporter.statuses();
    assert!(statuses.contains(&"verifying".to_string()));
    assert_eq!(statuses.last().unwrap(), "completed");

    let records = reporter.records();
    let verify_statuses: Vec<_> = records
        .iter()
        .filter_map(|r| r.get("verify_status").and_then(|v| v.as_str()))
        .collect();
    assert!(verify_statuses.contains(&"checking_existing_file"));
    assert!(verify_statuses.contains(&"checksum_verifying"));
    assert!(verify_statuses.contains(&"checksum_verified"));
}

#[tokio::test]
async fn test_stale_existing_file_is_replaced() {
    let body = test_body(32 * 1024);
    let (_server, url, _ranges) = spawn_origin(body.clone(), RangePolicy::Honor).await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("payload.bin");
    tokio::fs::write(&out, b"stale leftovers").await.unwrap();

    let mut job = test_job(&url, out.clone());
    job.expected_sha256 = Some(sha256_hex(&body));

    let reporter = Arc::new(CollectingReporter::default());
    let engine = DownloadEngine::new(job, reporter).unwrap();
    engine.run().await.unwrap();

    assert_eq!(tokio::fs::read(&out).await.unwrap(), body);
}

#[tokio::test]
async fn test_zero_byte_file_published() {
    let (_server, url, _ranges) = spawn_origin(Vec::new(), RangePolicy::Honor).await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("empty.bin");

    let reporter = Arc::new(CollectingReporter::default());
    let engine = DownloadEngine::new(test_job(&url, out.clone()), reporter.clone()).unwrap();
    engine.run().await.unwrap();

    assert_eq!(engine.mode(), EngineMode::SingleStream);
    assert_eq!(tokio::fs::metadata(&out).await.unwrap().len(), 0);
    assert_eq!(reporter.terminal().unwrap()["status"], "completed");
}

#[tokio::test]
async fn test_no_range_support_single_stream() {
    let body = test_body(512 * 1024);
    let (_server, url, ranges) = spawn_origin(body.clone(), RangePolicy::Ignore).await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("payload.bin");

    let mut job = test_job(&url, out.clone());
    job.expected_sha256 = Some(sha256_hex(&body));

    let reporter = Arc::new(CollectingReporter::default());
    let engine = DownloadEngine::new(job, reporter.clone()).unwrap();
    engine.run().await.unwrap();

    assert_eq!(engine.mode(), EngineMode::SingleStream);
    assert_eq!(tokio::fs::read(&out).await.unwrap(), body);

    // Only the probe carried a Range header; the transfer itself did not.
    let seen = ranges.lock().unwrap();
    assert_eq!(*seen.last().unwrap(), None);

    let terminal = reporter.terminal().unwrap();
    assert_eq!(terminal["verify_status"], "checksum_verified");
}

#[tokio::test]
async fn test_output_directory_derives_filename() {
    let body = test_body(8 * 1024);
    let (_server, url, _ranges) = spawn_origin(body.clone(), RangePolicy::Honor).await;

    let dir = tempfile::tempdir().unwrap();

    let reporter = Arc::new(CollectingReporter::default());
    let engine =
        DownloadEngine::new(test_job(&url, dir.path().to_path_buf()), reporter).unwrap();
    let outcome = engine.run().await.unwrap();

    assert_eq!(outcome.path, dir.path().join("file"));
    assert_eq!(tokio::fs::read(&outcome.path).await.unwrap(), body);
}

#[tokio::test]
async fn test_probe_failure_is_terminal() {
    // Nothing is listening on this port.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("never.bin");

    let mut job = test_job(&format!("http://127.0.0.1:{port}/file"), out.clone());
    job.connect_timeout = 2;

    let reporter = Arc::new(CollectingReporter::default());
    let engine = DownloadEngine::new(job, reporter.clone()).unwrap();
    let err = engine.run().await.unwrap_err();

    assert!(matches!(err, AccelaraError::ProbeFailure { .. }));
    assert!(!out.exists());
    assert_eq!(reporter.terminal().unwrap()["status"], "error");
}

#[tokio::test]
async fn test_events_carry_download_id_contract() {
    // The reporter owns id/timestamp injection; the engine-side records must
    // at least carry type and status on every event.
    let body = test_body(64 * 1024);
    let (_server, url, _ranges) = spawn_origin(body, RangePolicy::Honor).await;

    let dir = tempfile::tempdir().unwrap();
    let reporter = Arc::new(CollectingReporter::default());
    let engine = DownloadEngine::new(
        test_job(&url, dir.path().join("payload.bin")),
        reporter.clone(),
    )
    .unwrap();
    engine.run().await.unwrap();

    for record in reporter.records() {
        assert!(record.contains_key("type"));
        assert!(record.contains_key("status"));
    }
}
