//! Activity log for archdesk
//!
//! Records are buffered by a single writer task ([`ActivityLog`]) and appended
//! in batches to a line-delimited JSON file ([`ActivityStore`]) under an
//! advisory lock from `archdesk-lock`. Each flushed record is then offered to
//! webhook subscribers through [`WebhookFanout`], which wraps every endpoint in
//! its own circuit breaker and retries deliveries with backoff.
//!
//! ```no_run
//! use archdesk_activity::{ActivityLog, ActivityStore, Actor, WriterConfig};
//! use archdesk_lock::LockRegistry;
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let store = ActivityStore::new("data/activity-log.jsonl", Arc::new(LockRegistry::new()));
//! let log = ActivityLog::spawn(store, None, WriterConfig::default());
//!
//! log.file_uploaded("report.zip", 4096, &Actor::default()).await;
//! log.shutdown().await;
//! # }
//! ```

pub mod error;
pub mod presets;
pub mod record;
pub mod store;
pub mod webhook;
pub mod writer;

pub use error::{ActivityError, ActivityResult, WebhookError};
pub use record::{ActivityFilter, ActivityRecord, Actor, LogOptions, Severity};
pub use store::{ActivityStore, DEFAULT_MAX_RECORDS, DEFAULT_WRITE_LOCK_TIMEOUT};
pub use webhook::{
    sign_payload, DeliveryReport, HttpWebhookDispatcher, WebhookDispatcher, WebhookFanout,
    WebhookPayload, WebhookStats, WebhookSubscription,
};
pub use writer::{ActivityLog, WriterConfig, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_DELAY};
