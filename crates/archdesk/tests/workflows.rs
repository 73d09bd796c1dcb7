//! Integration tests for the upload workflows
//!
//! Each test runs a full `Services` instance against a scratch data directory.

use archdesk::config::{Config, RetryConfig, StorageConfig, WebhookConfig};
use archdesk::{SearchScope, ServiceError, Services};
use archdesk_activity::{ActivityFilter, Actor, WebhookDispatcher, WebhookError, WebhookPayload};
use archdesk_archive::{SearchMode, SearchOptions, WalletCategory};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, TempDir};
use zip::write::SimpleFileOptions;

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn config(dir: &TempDir) -> Config {
    Config {
        storage: Some(StorageConfig {
            data_dir: Some(dir.path().join("data")),
            uploads_dir: None,
        }),
        retry: Some(RetryConfig {
            max_retries: Some(0),
            ..Default::default()
        }),
        ..Default::default()
    }
}

async fn events(services: &Services, event: &str) -> usize {
    services
        .activity()
        .query_events(&ActivityFilter {
            event: Some(event.to_string()),
            ..ActivityFilter::default()
        })
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn test_upload_then_analyze() {
    let dir = tempdir().unwrap();
    let services = Services::start(config(&dir)).await.unwrap();
    let actor = Actor::user("u1", "ops@example.com");

    let bytes = zip_bytes(&[
        ("wallet.dat", b"\x00\x01binary"),
        ("seed.txt", b"write down your mnemonic phrase"),
        ("screenshot_01.png", b"\x89PNG"),
    ]);
    let upload = services.store_upload("evidence.zip", &bytes, &actor).await.unwrap();
    assert_eq!(upload.original_name, "evidence.zip");
    assert_eq!(upload.size, bytes.len() as u64);
    assert!(upload.filename.ends_with(".zip"));
    assert_ne!(upload.filename, "evidence.zip");
    assert!(services.uploads_dir().join(&upload.filename).is_file());

    let analysis = services.analyze_upload(&upload.filename, &actor).await.unwrap();
    assert!(analysis.has_wallet_indicators());
    assert!(analysis.matched_categories.contains(&WalletCategory::Bitcoin));
    assert!(analysis.matched_categories.contains(&WalletCategory::Wallets));
    assert_eq!(analysis.screenshot_entry_path.as_deref(), Some("screenshot_01.png"));

    let again = services.analyze_upload(&upload.filename, &actor).await.unwrap();
    assert!(Arc::ptr_eq(&analysis, &again));
    assert_eq!(services.analysis_cache().len(), 1);

    services.activity().flush().await.unwrap();
    assert_eq!(events(&services, "file.uploaded").await, 1);
    assert_eq!(events(&services, "file.analyzed").await, 2);
    services.shutdown().await;
}

#[tokio::test]
async fn test_upload_rejections() {
    let dir = tempdir().unwrap();
    let services = Services::start(config(&dir)).await.unwrap();
    let actor = Actor::default();

    let err = services.store_upload("../escape.zip", b"", &actor).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidFilename(_)));

    let err = services.store_upload("notes.txt", b"hello", &actor).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotZip(_)));

    let err = services.analyze_upload("missing.zip", &actor).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));

    assert_eq!(std::fs::read_dir(services.uploads_dir()).unwrap().count(), 0);
    services.shutdown().await;
}

#[tokio::test]
async fn test_bulk_delete_reports_partial_success() {
    let dir = tempdir().unwrap();
    let services = Services::start(config(&dir)).await.unwrap();
    let actor = Actor::default();

    let bytes = zip_bytes(&[("readme.txt", b"hello")]);
    let first = services.store_upload("a.zip", &bytes, &actor).await.unwrap();
    let second = services.store_upload("b.zip", &bytes, &actor).await.unwrap();

    let report = services
        .bulk_delete(
            vec![first.filename.clone(), "missing.zip".to_string(), second.filename.clone()],
            &actor,
        )
        .await
        .unwrap();

    assert_eq!(report.successful, 2);
    assert_eq!(report.failed, 1);
    let names: Vec<&str> = report.details.iter().map(|d| d.filename.as_str()).collect();
    assert_eq!(names, vec![first.filename.as_str(), "missing.zip", second.filename.as_str()]);
    assert!(!report.details[1].success);
    assert!(report.details[1].error.is_some());
    assert_eq!(report.details[1].duration_ms, 0);
    assert!(!services.uploads_dir().join(&first.filename).exists());

    services.activity().flush().await.unwrap();
    assert_eq!(events(&services, "file.bulk_deleted").await, 1);
    assert_eq!(events(&services, "system.error").await, 1);
    services.shutdown().await;
}

#[tokio::test]
async fn test_bulk_delete_rejects_traversal() {
    let dir = tempdir().unwrap();
    let services = Services::start(config(&dir)).await.unwrap();
    let actor = Actor::default();

    let upload = services
        .store_upload("a.zip", &zip_bytes(&[("a.txt", b"a")]), &actor)
        .await
        .unwrap();

    let err = services
        .bulk_delete(vec![upload.filename.clone(), "../../etc/passwd".to_string()], &actor)
        .await
        .unwrap_err();
    match err {
        ServiceError::InvalidFilenames(names) => assert_eq!(names, vec!["../../etc/passwd".to_string()]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(services.uploads_dir().join(&upload.filename).exists());
    assert_eq!(events(&services, "security.alert").await, 1);

    let err = services.bulk_delete(Vec::new(), &actor).await.unwrap_err();
    assert!(matches!(err, ServiceError::NoFilenames));
    services.shutdown().await;
}

#[tokio::test]
async fn test_search_and_extract() {
    let dir = tempdir().unwrap();
    let services = Services::start(config(&dir)).await.unwrap();
    let actor = Actor::default();

    let with_match = services
        .store_upload(
            "creds.zip",
            &zip_bytes(&[("notes/creds.txt", b"user: admin\npassword: hunter2\n")]),
            &actor,
        )
        .await
        .unwrap();
    services
        .store_upload("other.zip", &zip_bytes(&[("readme.md", b"nothing to see")]), &actor)
        .await
        .unwrap();

    let options = SearchOptions::default().with_mode(SearchMode::Content);
    let results = services
        .search_uploads("PASSWORD", SearchScope::All, options)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].filename, with_match.filename);
    assert_eq!(results[0].matches[0].path(), "notes/creds.txt");

    let scoped = services
        .search_uploads("readme", SearchScope::Files(vec![with_match.filename.clone()]), SearchOptions::default())
        .await
        .unwrap();
    assert!(scoped.is_empty());

    let bytes = services
        .extract_from_upload(&with_match.filename, "notes/creds.txt")
        .await
        .unwrap();
    assert_eq!(bytes.as_deref(), Some(&b"user: admin\npassword: hunter2\n"[..]));
    assert!(services
        .extract_from_upload(&with_match.filename, "absent.txt")
        .await
        .unwrap()
        .is_none());
    services.shutdown().await;
}

#[derive(Default)]
struct RecordingDispatcher {
    events: Mutex<Vec<String>>,
}

#[async_trait]
impl WebhookDispatcher for RecordingDispatcher {
    async fn deliver(
        &self,
        _url: &str,
        payload: &WebhookPayload,
        _headers: &HashMap<String, String>,
    ) -> Result<(), WebhookError> {
        self.events.lock().unwrap().push(payload.event.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_upload_notifies_webhooks() {
    let dir = tempdir().unwrap();
    let mut config = config(&dir);
    config.webhooks.push(WebhookConfig {
        id: "ops".to_string(),
        name: None,
        url: "https://hooks.example.com/ops".to_string(),
        events: vec!["file.uploaded".to_string(), "activity.file.uploaded".to_string()],
        secret: Some("s3cret".to_string()),
        headers: HashMap::new(),
        active: None,
        retry_on_failure: None,
        max_retries: None,
    });
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let services = Services::with_dispatcher(config, dispatcher.clone()).await.unwrap();

    services
        .store_upload("a.zip", &zip_bytes(&[("a.txt", b"a")]), &Actor::default())
        .await
        .unwrap();
    services.shutdown().await;

    let mut delivered = dispatcher.events.lock().unwrap().clone();
    delivered.sort();
    assert_eq!(delivered, vec!["activity.file.uploaded".to_string(), "file.uploaded".to_string()]);
}
