//! Service wiring and the upload workflows
//!
//! [`Services`] owns one instance of every shared component: the lock
//! registry, the activity log writer, webhook fan-out and the analysis cache.
//! Workflows run on the tokio runtime; archive scanning is synchronous and is
//! moved to the blocking pool.

use crate::config::Config;
use crate::error::{ServiceError, ServiceResult};
use anyhow::{Context, Result};
use archdesk_activity::{
    ActivityLog, ActivityStore, Actor, HttpWebhookDispatcher, WebhookDispatcher, WebhookFanout,
    WriterConfig,
};
use archdesk_archive::{
    extract_entry, list_archives, search_many_archives, AnalysisCache, AnalysisResult,
    ArchiveMatches, SearchOptions, MAX_FILE_SIZE,
};
use archdesk_lock::{LockOptions, LockRegistry};
use archdesk_resilience::{
    is_transient_fs_error, retry_batch, retry_file_operation, BatchOptions, FileRetryOverrides,
    RetryPolicy,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// A stored upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredUpload {
    /// Generated name under the uploads directory
    pub filename: String,
    pub original_name: String,
    pub size: u64,
    pub upload_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub filename: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Zero for failed items
    pub duration_ms: u64,
}

/// Partial-success report for a bulk delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkDeleteReport {
    pub successful: usize,
    pub failed: usize,
    pub details: Vec<DeleteOutcome>,
    pub duration_ms: u64,
}

/// Which uploads a search covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchScope {
    All,
    Files(Vec<String>),
}

/// Reject names that are empty or could leave the uploads directory
pub fn validate_filename(name: &str) -> ServiceResult<()> {
    if name.is_empty() || name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(ServiceError::InvalidFilename(name.to_string()));
    }
    Ok(())
}

/// `<16 hex>_<unix millis>.zip`
fn generated_upload_name() -> String {
    let random: [u8; 8] = rand::random();
    format!("{}_{}.zip", hex::encode(random), Utc::now().timestamp_millis())
}

pub struct Services {
    config: Config,
    uploads_dir: PathBuf,
    locks: Arc<LockRegistry>,
    activity: ActivityLog,
    webhooks: Option<Arc<WebhookFanout>>,
    analysis_cache: Arc<AnalysisCache>,
}

impl Services {
    /// Build every component from `config`, delivering webhooks over HTTP.
    ///
    /// Must be called inside a tokio runtime; the activity writer task is
    /// spawned here.
    pub async fn start(config: Config) -> Result<Self> {
        let dispatcher: Option<Arc<dyn WebhookDispatcher>> = if config.webhooks.is_empty() {
            None
        } else {
            Some(Arc::new(
                HttpWebhookDispatcher::new().context("Failed to build webhook HTTP client")?,
            ))
        };
        Self::build(config, dispatcher)
    }

    /// Same as [`start`](Self::start) with a caller-supplied webhook dispatcher
    pub async fn with_dispatcher(config: Config, dispatcher: Arc<dyn WebhookDispatcher>) -> Result<Self> {
        Self::build(config, Some(dispatcher))
    }

    fn build(config: Config, dispatcher: Option<Arc<dyn WebhookDispatcher>>) -> Result<Self> {
        let data_dir = config.data_dir();
        let uploads_dir = config.uploads_dir();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
        std::fs::create_dir_all(&uploads_dir)
            .with_context(|| format!("Failed to create uploads directory: {}", uploads_dir.display()))?;

        let locks = Arc::new(LockRegistry::new());
        let store = ActivityStore::new(config.activity_log_path(), Arc::clone(&locks))
            .with_max_records(config.max_records())
            .with_lock_options(LockOptions::default().with_timeout(config.lock_timeout()));

        let subscriptions = config.webhook_subscriptions();
        let webhooks = dispatcher
            .filter(|_| !subscriptions.is_empty())
            .map(|dispatcher| Arc::new(WebhookFanout::new(subscriptions, dispatcher)));

        let activity = ActivityLog::spawn(
            store,
            webhooks.clone(),
            WriterConfig {
                batch_size: config.activity_batch_size(),
                flush_delay: config.flush_delay(),
            },
        );

        info!(
            uploads = %uploads_dir.display(),
            webhooks = webhooks.as_ref().map_or(0, |w| w.subscriptions().count()),
            "archdesk services started"
        );

        Ok(Self {
            config,
            uploads_dir,
            locks,
            activity,
            webhooks,
            analysis_cache: Arc::new(AnalysisCache::default()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    pub fn analysis_cache(&self) -> &AnalysisCache {
        &self.analysis_cache
    }

    /// Flush the activity log and wait for pending webhook deliveries
    pub async fn shutdown(&self) {
        self.activity.shutdown().await;
    }

    /// Validate and store an uploaded ZIP under a generated name.
    pub async fn store_upload(&self, original_name: &str, bytes: &[u8], actor: &Actor) -> ServiceResult<StoredUpload> {
        validate_filename(original_name)?;
        if !original_name.to_ascii_lowercase().ends_with(".zip") {
            return Err(ServiceError::NotZip(original_name.to_string()));
        }
        let size = bytes.len() as u64;
        if size > MAX_FILE_SIZE {
            return Err(ServiceError::TooLarge {
                size,
                max: MAX_FILE_SIZE,
            });
        }

        let filename = generated_upload_name();
        let path = self.uploads_dir.join(&filename);
        let overrides = FileRetryOverrides::default();
        retry_file_operation("Create uploads directory", || tokio::fs::create_dir_all(&self.uploads_dir), &overrides)
            .await?;
        retry_file_operation(&format!("Write upload {filename}"), || tokio::fs::write(&path, bytes), &overrides).await?;

        let upload = StoredUpload {
            filename,
            original_name: original_name.to_string(),
            size,
            upload_time: Utc::now(),
        };
        info!(filename = %upload.filename, original = %upload.original_name, size, "upload stored");

        self.activity.file_uploaded(&upload.filename, size, actor).await;

        if let Some(webhooks) = &self.webhooks {
            let data = serde_json::to_value(&upload).unwrap_or_default();
            for report in webhooks.trigger("file.uploaded", &data).await {
                self.activity
                    .webhook_triggered(&report.subscription_id, "file.uploaded", report.success)
                    .await;
            }
        }

        Ok(upload)
    }

    /// Delete uploads in bounded-concurrency batches with per-item retry.
    ///
    /// Every name is validated first; one bad name rejects the whole request
    /// and is recorded as a security alert. After that, failures are reported
    /// per item.
    pub async fn bulk_delete(&self, filenames: Vec<String>, actor: &Actor) -> ServiceResult<BulkDeleteReport> {
        if filenames.is_empty() {
            self.activity
                .system_error("Bulk delete called without filenames", None)
                .await;
            return Err(ServiceError::NoFilenames);
        }

        let invalid: Vec<String> = filenames
            .iter()
            .filter(|name| validate_filename(name).is_err())
            .cloned()
            .collect();
        if !invalid.is_empty() {
            self.activity
                .security_alert(
                    "path_traversal",
                    "Path traversal attempt detected in bulk delete",
                    Some(json!({ "invalidFiles": invalid })),
                )
                .await;
            if let Err(e) = self.activity.flush().await {
                warn!("Failed to flush security alert: {e}");
            }
            return Err(ServiceError::InvalidFilenames(invalid));
        }

        let started = Instant::now();
        let uploads_dir = self.uploads_dir.as_path();
        let options = BatchOptions::new()
            .with_batch_size(self.config.bulk_batch_size())
            .with_max_concurrency(self.config.bulk_max_concurrency())
            .with_retry(
                RetryPolicy::new()
                    .with_max_retries(self.config.max_retries())
                    .with_base_delay(self.config.retry_base_delay())
                    .with_max_delay(self.config.retry_max_delay())
                    .retry_if(|err: &io::Error, _| is_transient_fs_error(err) && err.kind() != io::ErrorKind::NotFound)
                    .on_retry(|err, attempt, _| warn!(attempt, "Bulk delete retry: {err}")),
            )
            .on_progress(|progress| {
                if progress.completed % 10 == 0 || progress.completed == progress.total {
                    info!(
                        "Bulk delete progress: {}/{} ({} failed)",
                        progress.completed, progress.total, progress.failed
                    );
                }
            });

        let outcomes = retry_batch(
            filenames,
            |filename: String| async move {
                let item_started = Instant::now();
                let path = uploads_dir.join(&filename);
                let overrides = FileRetryOverrides::default();
                retry_file_operation(
                    &format!("File access check for {filename}"),
                    || tokio::fs::metadata(&path),
                    &overrides,
                )
                .await
                .map_err(|e| e.into_inner())?;
                retry_file_operation(&format!("File deletion for {filename}"), || tokio::fs::remove_file(&path), &overrides)
                    .await
                    .map_err(|e| e.into_inner())?;
                Ok::<_, io::Error>(item_started.elapsed())
            },
            &options,
        )
        .await;

        let details: Vec<DeleteOutcome> = outcomes
            .into_iter()
            .map(|outcome| match outcome.result {
                Ok(elapsed) => DeleteOutcome {
                    filename: outcome.item,
                    success: true,
                    error: None,
                    duration_ms: elapsed.as_millis() as u64,
                },
                Err(e) => DeleteOutcome {
                    filename: outcome.item,
                    success: false,
                    error: Some(e.last_error.to_string()),
                    duration_ms: 0,
                },
            })
            .collect();

        for outcome in details.iter().filter(|d| d.success) {
            self.analysis_cache.invalidate(&self.uploads_dir.join(&outcome.filename));
        }

        let deleted: Vec<String> = details.iter().filter(|d| d.success).map(|d| d.filename.clone()).collect();
        let failures: Vec<&DeleteOutcome> = details.iter().filter(|d| !d.success).collect();
        let duration_ms = started.elapsed().as_millis() as u64;

        if !deleted.is_empty() {
            self.activity.bulk_file_deleted(&deleted, actor).await;
        }
        if !failures.is_empty() {
            let failed_files: Vec<_> = failures
                .iter()
                .map(|f| json!({ "filename": f.filename, "error": f.error }))
                .collect();
            self.activity
                .system_error(
                    &format!("Bulk delete failed for {} files", failures.len()),
                    Some(json!({ "failedFiles": failed_files, "totalDuration": format!("{duration_ms}ms") })),
                )
                .await;
        }

        Ok(BulkDeleteReport {
            successful: deleted.len(),
            failed: failures.len(),
            details,
            duration_ms,
        })
    }

    /// Inspect an upload, reusing a cached result while it is fresh
    pub async fn analyze_upload(&self, filename: &str, actor: &Actor) -> ServiceResult<Arc<AnalysisResult>> {
        let path = self.existing_upload(filename).await?;
        let cache = Arc::clone(&self.analysis_cache);
        let analysis = tokio::task::spawn_blocking(move || cache.get_or_analyze(&path)).await??;

        let categories: Vec<&str> = analysis.matched_categories.iter().map(|c| c.name()).collect();
        self.activity
            .file_analyzed(
                filename,
                json!({
                    "hasScreenshot": analysis.has_screenshot_like_entry,
                    "hasCryptoWallet": analysis.has_wallet_indicators(),
                    "walletTypes": categories,
                }),
                actor,
            )
            .await;

        Ok(analysis)
    }

    /// Search uploads by entry name and/or text content
    pub async fn search_uploads(
        &self,
        term: &str,
        scope: SearchScope,
        options: SearchOptions,
    ) -> ServiceResult<Vec<ArchiveMatches>> {
        let paths = match scope {
            SearchScope::All => {
                if !tokio::fs::try_exists(&self.uploads_dir).await.unwrap_or(false) {
                    return Ok(Vec::new());
                }
                let dir = self.uploads_dir.clone();
                tokio::task::spawn_blocking(move || list_archives(&dir)).await??
            }
            SearchScope::Files(names) => {
                let mut paths = Vec::with_capacity(names.len());
                for name in &names {
                    validate_filename(name)?;
                    paths.push(self.uploads_dir.join(name));
                }
                paths
            }
        };

        let term = term.to_string();
        let results = tokio::task::spawn_blocking(move || search_many_archives(&paths, &term, &options)).await??;
        Ok(results)
    }

    /// Bytes of one entry inside an upload, `None` when the entry is missing
    pub async fn extract_from_upload(&self, filename: &str, entry_path: &str) -> ServiceResult<Option<Vec<u8>>> {
        let path = self.existing_upload(filename).await?;
        let entry_path = entry_path.to_string();
        let bytes = tokio::task::spawn_blocking(move || extract_entry(&path, &entry_path)).await??;
        Ok(bytes)
    }

    async fn existing_upload(&self, filename: &str) -> ServiceResult<PathBuf> {
        validate_filename(filename)?;
        let path = self.uploads_dir.join(filename);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(ServiceError::NotFound(filename.to_string())),
        }
    }
}
