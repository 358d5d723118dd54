//! Watcher and scheduler integration tests

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use certkeeper::models::SubjectDefaults;
use certkeeper::services::{
    start_certificate_scheduler, start_certificate_watcher, CertificateManager,
};

use crate::common::*;

async fn wait_for(path: &Path) -> bool {
    for _ in 0..100 {
        if path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_written_descriptor_is_issued() {
    let ws = Workspace::new();
    let manager = Arc::new(CertificateManager::new(
        SubjectDefaults::default(),
        vec![ws.requests_dir()],
    ));
    let shutdown = CancellationToken::new();
    let handle = start_certificate_watcher(manager, shutdown.clone()).unwrap();

    let out = ws.out_dir("watched");
    ws.write_request(
        "watched.yaml",
        &RequestFixture::new(&out).private_key("ecdsa", 256).to_yaml(),
    );

    assert!(wait_for(&out.join("tls.crt")).await, "certificate was not issued");
    assert!(out.join("tls.key").exists());

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("watcher did not stop")
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watcher_ignores_unsupported_files() {
    let ws = Workspace::new();
    let manager = Arc::new(CertificateManager::new(
        SubjectDefaults::default(),
        vec![ws.requests_dir()],
    ));
    let shutdown = CancellationToken::new();
    let handle = start_certificate_watcher(manager, shutdown.clone()).unwrap();

    let out = ws.out_dir("ignored");
    ws.write_request(
        "ignored.txt",
        &RequestFixture::new(&out).private_key("ecdsa", 256).to_yaml(),
    );
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!out.exists());

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduler_issues_existing_descriptors() {
    let ws = Workspace::new();
    let out = ws.out_dir("scheduled");
    ws.write_request(
        "scheduled.json",
        &RequestFixture::new(&out).private_key("ed25519", 0).to_json(),
    );

    let manager = Arc::new(CertificateManager::new(
        SubjectDefaults::default(),
        vec![ws.requests_dir()],
    ));
    let shutdown = CancellationToken::new();
    let handle =
        start_certificate_scheduler(manager, Duration::from_secs(3600), shutdown.clone());

    assert!(wait_for(&out.join("tls.crt")).await, "certificate was not issued");

    shutdown.cancel();
    handle.await.unwrap();
}
