//! Batching activity writer
//!
//! [`ActivityLog`] is a cheap-to-clone handle. Buffered records go through a
//! channel to one writer task, which owns the batch buffer and the flush
//! timer, so flushes never interleave: records arriving while a flush is
//! running wait in the channel for the next cycle.
//!
//! Flush triggers:
//! - the buffer reaches `batch_size`
//! - no new record arrived for `flush_delay`
//! - an explicit [`ActivityLog::flush`] or [`ActivityLog::shutdown`]
//!
//! A failed flush puts its batch back in front of the buffer and retries
//! after another `flush_delay`. The failure itself is recorded as a
//! `system.error` through the immediate path, and only reported to tracing
//! when that write fails too.

use crate::error::{ActivityError, ActivityResult};
use crate::record::{ActivityFilter, ActivityRecord, LogOptions, Severity};
use crate::store::ActivityStore;
use crate::webhook::WebhookFanout;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Records per batch before an immediate flush (50)
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Quiet period before a partial batch is flushed (2 seconds)
pub const DEFAULT_FLUSH_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterConfig {
    pub batch_size: usize,
    pub flush_delay: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_delay: DEFAULT_FLUSH_DELAY,
        }
    }
}

struct Pending {
    record: ActivityRecord,
    notify: bool,
}

enum Command {
    Record(Pending),
    Flush(oneshot::Sender<ActivityResult<usize>>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the activity log and its writer task
#[derive(Debug, Clone)]
pub struct ActivityLog {
    tx: mpsc::UnboundedSender<Command>,
    store: Arc<ActivityStore>,
    webhooks: Option<Arc<WebhookFanout>>,
}

impl ActivityLog {
    /// Spawn the writer task on the current tokio runtime
    pub fn spawn(store: ActivityStore, webhooks: Option<Arc<WebhookFanout>>, config: WriterConfig) -> Self {
        let store = Arc::new(store);
        let (tx, rx) = mpsc::unbounded_channel();

        let task = WriterTask {
            rx,
            store: Arc::clone(&store),
            webhooks: webhooks.clone(),
            config: WriterConfig {
                batch_size: config.batch_size.max(1),
                flush_delay: config.flush_delay,
            },
            buffer: Vec::new(),
            deadline: None,
            fanouts: JoinSet::new(),
        };
        tokio::spawn(task.run());

        Self { tx, store, webhooks }
    }

    pub fn store(&self) -> &ActivityStore {
        &self.store
    }

    /// Record an event and return it.
    ///
    /// With `options.immediate` the record is written (and fanned out to
    /// webhooks) before this returns; failures are reported to tracing.
    /// Otherwise it is queued for the next batch flush.
    pub async fn log_event(
        &self,
        event: impl Into<String>,
        description: impl Into<String>,
        options: LogOptions,
    ) -> ActivityRecord {
        let record = ActivityRecord::new(event, description, &options);

        if options.immediate {
            match self.store.append(std::slice::from_ref(&record)).await {
                Ok(_) => {
                    if let Some(webhooks) = self.webhooks.as_ref().filter(|_| options.trigger_webhook) {
                        let data = serde_json::to_value(&record).unwrap_or_default();
                        webhooks.trigger(&record.webhook_event(), &data).await;
                    }
                }
                Err(e) => error!(event = %record.event, "Failed to immediately write activity record: {e}"),
            }
            return record;
        }

        let pending = Pending {
            record: record.clone(),
            notify: options.trigger_webhook,
        };
        if self.tx.send(Command::Record(pending)).is_err() {
            error!(event = %record.event, "Activity writer stopped; record dropped");
        }
        record
    }

    /// Write everything buffered so far. Returns the number of records on disk.
    pub async fn flush(&self) -> ActivityResult<usize> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Command::Flush(reply))
            .map_err(|_| ActivityError::WriterClosed)?;
        response.await.map_err(|_| ActivityError::WriterClosed)?
    }

    /// Records on disk matching `filter`, newest first.
    ///
    /// Buffered records are not visible until flushed.
    pub async fn query_events(&self, filter: &ActivityFilter) -> ActivityResult<Vec<ActivityRecord>> {
        Ok(filter.apply(self.store.load().await?))
    }

    /// Remove records older than `before`, or all of them. Returns the number removed.
    pub async fn clear_events(&self, before: Option<DateTime<Utc>>) -> ActivityResult<usize> {
        self.store.clear(before).await
    }

    /// Flush, wait for outstanding webhook deliveries, and stop the writer task.
    ///
    /// Later buffered events are dropped with an error log. Calling this on an
    /// already stopped writer is a no-op.
    pub async fn shutdown(&self) {
        let (reply, done) = oneshot::channel();
        if self.tx.send(Command::Shutdown(reply)).is_ok() {
            let _ = done.await;
        }
    }
}

struct WriterTask {
    rx: mpsc::UnboundedReceiver<Command>,
    store: Arc<ActivityStore>,
    webhooks: Option<Arc<WebhookFanout>>,
    config: WriterConfig,
    buffer: Vec<Pending>,
    deadline: Option<Instant>,
    fanouts: JoinSet<()>,
}

impl WriterTask {
    async fn run(mut self) {
        debug!(path = %self.store.path().display(), "activity writer started");

        loop {
            let deadline = self.deadline;
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(Command::Record(pending)) => {
                        self.buffer.push(pending);
                        if self.buffer.len() >= self.config.batch_size {
                            let _ = self.flush().await;
                        } else {
                            self.deadline = Some(Instant::now() + self.config.flush_delay);
                        }
                    }
                    Some(Command::Flush(reply)) => {
                        let result = self.flush().await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Shutdown(reply)) => {
                        self.stop().await;
                        let _ = reply.send(());
                        return;
                    }
                    None => {
                        self.stop().await;
                        return;
                    }
                },
                () = sleep_until(deadline), if deadline.is_some() => {
                    let _ = self.flush().await;
                }
            }

            while self.fanouts.try_join_next().is_some() {}
        }
    }

    async fn stop(&mut self) {
        self.rx.close();
        while let Ok(command) = self.rx.try_recv() {
            match command {
                Command::Record(pending) => self.buffer.push(pending),
                Command::Flush(reply) => {
                    let _ = reply.send(Err(ActivityError::WriterClosed));
                }
                Command::Shutdown(reply) => {
                    let _ = reply.send(());
                }
            }
        }

        if let Err(e) = self.flush().await {
            error!("Dropping {} activity records at shutdown: {e}", self.buffer.len());
        }
        while self.fanouts.join_next().await.is_some() {}
        info!("activity writer stopped");
    }

    async fn flush(&mut self) -> ActivityResult<usize> {
        self.deadline = None;
        if self.buffer.is_empty() {
            return Ok(self.store.load().await?.len());
        }

        let batch = std::mem::take(&mut self.buffer);
        let records: Vec<ActivityRecord> = batch.iter().map(|p| p.record.clone()).collect();
        match self.store.append(&records).await {
            Ok(on_disk) => {
                debug!(records = records.len(), on_disk, "activity batch flushed");
                if let Some(webhooks) = &self.webhooks {
                    let webhooks = Arc::clone(webhooks);
                    let notify: Vec<ActivityRecord> =
                        batch.into_iter().filter(|p| p.notify).map(|p| p.record).collect();
                    if !notify.is_empty() {
                        self.fanouts.spawn(async move {
                            for record in notify {
                                let data = serde_json::to_value(&record).unwrap_or_default();
                                webhooks.trigger(&record.webhook_event(), &data).await;
                            }
                        });
                    }
                }
                Ok(on_disk)
            }
            Err(e) => {
                let count = batch.len();
                let mut requeued = batch;
                requeued.append(&mut self.buffer);
                self.buffer = requeued;
                self.deadline = Some(Instant::now() + self.config.flush_delay);

                self.report_failure(count, &e).await;
                Err(e)
            }
        }
    }

    /// Log a failed flush as `system.error`, bypassing the buffer
    async fn report_failure(&self, count: usize, failure: &ActivityError) {
        let options = LogOptions::new()
            .with_severity(Severity::Error)
            .with_metadata(serde_json::json!({
                "error": failure.to_string(),
                "context": { "operation": "activity flush", "records": count },
            }));
        let record = ActivityRecord::new(
            "system.error",
            format!("System error: failed to flush {count} activity records"),
            &options,
        );

        if let Err(e) = self.store.append(std::slice::from_ref(&record)).await {
            error!("Failed to flush {count} activity records ({failure}); error record not written: {e}");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::tests::{subscription, ScriptedDispatcher};
    use archdesk_lock::LockRegistry;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ActivityStore {
        ActivityStore::new(dir.path().join("activity-log.jsonl"), Arc::new(LockRegistry::new()))
    }

    fn quick() -> WriterConfig {
        WriterConfig {
            batch_size: 50,
            flush_delay: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_retention_after_1050_records() {
        let dir = TempDir::new().unwrap();
        let log = ActivityLog::spawn(store(&dir), None, WriterConfig {
            batch_size: 50,
            flush_delay: Duration::from_secs(60),
        });

        let mut ids = Vec::new();
        for i in 0..1050 {
            let record = log.log_event("test.event", format!("record {i}"), LogOptions::new()).await;
            ids.push(record.id);
        }
        assert_eq!(log.flush().await.unwrap(), 1000);

        let on_disk = log.store().load().await.unwrap();
        assert_eq!(on_disk.len(), 1000);
        assert_eq!(on_disk.first().unwrap().id, ids[50]);
        assert_eq!(on_disk.last().unwrap().id, ids[1049]);
        log.shutdown().await;
    }

    #[tokio::test]
    async fn test_partial_batch_flushes_after_quiet_period() {
        let dir = TempDir::new().unwrap();
        let log = ActivityLog::spawn(store(&dir), None, quick());

        log.log_event("file.uploaded", "File uploaded: a.zip", LogOptions::new()).await;
        log.log_event("file.uploaded", "File uploaded: b.zip", LogOptions::new()).await;
        assert!(log.store().load().await.unwrap().is_empty(), "still buffered");

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(log.store().load().await.unwrap().len(), 2);
        log.shutdown().await;
    }

    #[tokio::test]
    async fn test_immediate_records_skip_the_buffer() {
        let dir = TempDir::new().unwrap();
        let log = ActivityLog::spawn(store(&dir), None, WriterConfig {
            batch_size: 50,
            flush_delay: Duration::from_secs(60),
        });

        log.log_event("file.uploaded", "queued", LogOptions::new()).await;
        log.log_event("system.error", "System error: disk", LogOptions::new().immediate()).await;

        let on_disk = log.store().load().await.unwrap();
        assert_eq!(on_disk.len(), 1);
        assert_eq!(on_disk[0].event, "system.error");
        log.shutdown().await;
    }

    #[tokio::test]
    async fn test_query_and_clear() {
        let dir = TempDir::new().unwrap();
        let log = ActivityLog::spawn(store(&dir), None, quick());

        log.log_event("file.uploaded", "one", LogOptions::new().with_severity(Severity::Success)).await;
        log.log_event("file.deleted", "two", LogOptions::new().with_severity(Severity::Warning)).await;
        log.log_event("file.uploaded", "three", LogOptions::new().with_severity(Severity::Success)).await;
        log.flush().await.unwrap();

        let uploads = log
            .query_events(&ActivityFilter {
                event: Some("file.uploaded".into()),
                ..ActivityFilter::default()
            })
            .await
            .unwrap();
        let descriptions: Vec<&str> = uploads.iter().map(|r| r.description.as_str()).collect();
        assert_eq!(descriptions, vec!["three", "one"]);

        assert_eq!(log.clear_events(None).await.unwrap(), 3);
        assert!(log.query_events(&ActivityFilter::default()).await.unwrap().is_empty());
        log.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_flush_requeues_batch() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"a file where a directory should be").unwrap();
        let path = blocker.join("activity-log.jsonl");
        let store = ActivityStore::new(&path, Arc::new(LockRegistry::new()));
        let log = ActivityLog::spawn(store, None, WriterConfig {
            batch_size: 50,
            flush_delay: Duration::from_secs(60),
        });

        log.log_event("file.uploaded", "kept", LogOptions::new()).await;
        assert!(log.flush().await.is_err());

        std::fs::remove_file(&blocker).unwrap();
        assert_eq!(log.flush().await.unwrap(), 1);
        let on_disk = log.store().load().await.unwrap();
        assert_eq!(on_disk[0].description, "kept");
        log.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_flushes_and_delivers_webhooks() {
        let dir = TempDir::new().unwrap();
        let dispatcher = Arc::new(ScriptedDispatcher::default());
        let fanout = Arc::new(WebhookFanout::new(
            vec![subscription("a", &["activity.file.uploaded"])],
            dispatcher.clone(),
        ));
        let log = ActivityLog::spawn(store(&dir), Some(fanout), WriterConfig {
            batch_size: 50,
            flush_delay: Duration::from_secs(60),
        });

        log.log_event("file.uploaded", "one", LogOptions::new()).await;
        log.log_event("file.deleted", "two", LogOptions::new()).await;
        log.shutdown().await;

        assert_eq!(log.store().load().await.unwrap().len(), 2);
        assert_eq!(dispatcher.calls(), 1);
        assert!(log.flush().await.is_err(), "writer is stopped");
    }

    #[tokio::test]
    async fn test_immediate_event_triggers_webhook_inline() {
        let dir = TempDir::new().unwrap();
        let dispatcher = Arc::new(ScriptedDispatcher::default());
        let fanout = Arc::new(WebhookFanout::new(
            vec![subscription("a", &["activity.system.error"])],
            dispatcher.clone(),
        ));
        let log = ActivityLog::spawn(store(&dir), Some(fanout), quick());

        log.log_event("system.error", "boom", LogOptions::new().immediate()).await;
        assert_eq!(dispatcher.calls(), 1);

        log.log_event("system.error", "quiet", LogOptions::new().immediate().without_webhooks()).await;
        assert_eq!(dispatcher.calls(), 1);
        log.shutdown().await;
    }
}
