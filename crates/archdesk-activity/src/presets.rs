//! Helpers for the events archdesk records routinely

use crate::record::{ActivityRecord, Actor, LogOptions, Severity};
use crate::writer::ActivityLog;
use serde_json::{json, Value};

impl ActivityLog {
    pub async fn file_uploaded(&self, filename: &str, size: u64, actor: &Actor) -> ActivityRecord {
        self.log_event(
            "file.uploaded",
            format!("File uploaded: {filename}"),
            LogOptions::new()
                .with_actor(actor)
                .with_metadata(json!({ "filename": filename, "size": size }))
                .with_severity(Severity::Success),
        )
        .await
    }

    pub async fn file_deleted(&self, filename: &str, actor: &Actor) -> ActivityRecord {
        self.log_event(
            "file.deleted",
            format!("File deleted: {filename}"),
            LogOptions::new()
                .with_actor(actor)
                .with_metadata(json!({ "filename": filename }))
                .with_severity(Severity::Warning),
        )
        .await
    }

    pub async fn bulk_file_deleted(&self, filenames: &[String], actor: &Actor) -> ActivityRecord {
        self.log_event(
            "file.bulk_deleted",
            format!("Bulk deleted {} files", filenames.len()),
            LogOptions::new()
                .with_actor(actor)
                .with_metadata(json!({ "filenames": filenames, "count": filenames.len() }))
                .with_severity(Severity::Warning),
        )
        .await
    }

    /// `result` is the serialized analysis
    pub async fn file_analyzed(&self, filename: &str, result: Value, actor: &Actor) -> ActivityRecord {
        self.log_event(
            "file.analyzed",
            format!("File analyzed: {filename}"),
            LogOptions::new()
                .with_actor(actor)
                .with_metadata(json!({ "filename": filename, "result": result })),
        )
        .await
    }

    pub async fn webhook_triggered(&self, name: &str, event: &str, success: bool) -> ActivityRecord {
        let severity = if success { Severity::Success } else { Severity::Error };
        self.log_event(
            "webhook.triggered",
            format!("Webhook {name} triggered for {event}"),
            LogOptions::new()
                .with_metadata(json!({ "name": name, "event": event, "success": success }))
                .with_severity(severity),
        )
        .await
    }

    /// Object fields of `metadata` are merged next to `type`.
    pub async fn security_alert(&self, kind: &str, description: &str, metadata: Option<Value>) -> ActivityRecord {
        let mut fields = serde_json::Map::new();
        fields.insert("type".into(), Value::String(kind.to_string()));
        match metadata {
            Some(Value::Object(extra)) => fields.extend(extra),
            Some(other) => {
                fields.insert("details".into(), other);
            }
            None => {}
        }

        self.log_event(
            "security.alert",
            description,
            LogOptions::new()
                .with_metadata(Value::Object(fields))
                .with_severity(Severity::Error),
        )
        .await
    }

    /// Written immediately, never buffered
    pub async fn system_error(&self, error: &str, context: Option<Value>) -> ActivityRecord {
        self.log_event(
            "system.error",
            format!("System error: {error}"),
            LogOptions::new()
                .with_metadata(json!({ "error": error, "context": context }))
                .with_severity(Severity::Error)
                .immediate(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::record::{ActivityFilter, Actor, Severity};
    use crate::store::ActivityStore;
    use crate::writer::{ActivityLog, WriterConfig};
    use archdesk_lock::LockRegistry;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn log(dir: &TempDir) -> ActivityLog {
        let store = ActivityStore::new(dir.path().join("activity-log.jsonl"), Arc::new(LockRegistry::new()));
        ActivityLog::spawn(store, None, WriterConfig::default())
    }

    #[tokio::test]
    async fn test_upload_and_bulk_delete_records() {
        let dir = TempDir::new().unwrap();
        let log = log(&dir);
        let actor = Actor::user("u1", "ops@example.com").with_ip("10.0.0.4");

        let uploaded = log.file_uploaded("a.zip", 2048, &actor).await;
        assert_eq!(uploaded.event, "file.uploaded");
        assert_eq!(uploaded.description, "File uploaded: a.zip");
        assert_eq!(uploaded.severity, Severity::Success);
        assert_eq!(uploaded.ip.as_deref(), Some("10.0.0.4"));
        assert_eq!(uploaded.metadata, Some(json!({"filename": "a.zip", "size": 2048})));

        let names = vec!["a.zip".to_string(), "b.zip".to_string()];
        let bulk = log.bulk_file_deleted(&names, &actor).await;
        assert_eq!(bulk.description, "Bulk deleted 2 files");
        assert_eq!(bulk.metadata.as_ref().unwrap()["count"], 2);

        log.flush().await.unwrap();
        let warnings = log
            .query_events(&ActivityFilter {
                severity: Some(Severity::Warning),
                ..ActivityFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(warnings.len(), 1);
        log.shutdown().await;
    }

    #[tokio::test]
    async fn test_system_error_is_written_immediately() {
        let dir = TempDir::new().unwrap();
        let log = log(&dir);

        log.system_error("disk full", Some(json!({"operation": "upload"}))).await;
        let on_disk = log.store().load().await.unwrap();
        assert_eq!(on_disk.len(), 1);
        assert_eq!(on_disk[0].description, "System error: disk full");
        assert_eq!(on_disk[0].metadata.as_ref().unwrap()["context"]["operation"], "upload");
        log.shutdown().await;
    }

    #[tokio::test]
    async fn test_security_alert_merges_metadata() {
        let dir = TempDir::new().unwrap();
        let log = log(&dir);

        let alert = log
            .security_alert(
                "invalid_filename",
                "Invalid filename in bulk delete: ../etc/passwd",
                Some(json!({"filename": "../etc/passwd"})),
            )
            .await;
        assert_eq!(alert.event, "security.alert");
        assert_eq!(
            alert.metadata,
            Some(json!({"type": "invalid_filename", "filename": "../etc/passwd"}))
        );

        let failed = log.webhook_triggered("ops", "activity.file.uploaded", false).await;
        assert_eq!(failed.severity, Severity::Error);
        log.shutdown().await;
    }
}
