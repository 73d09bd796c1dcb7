//! Line-delimited JSON activity file with a record cap
//!
//! Every mutation is a read-modify-write of the whole file under the advisory
//! lock, written to a sibling temp file and renamed into place.

use crate::error::{ActivityError, ActivityResult};
use crate::record::ActivityRecord;
use archdesk_lock::{LockOptions, LockRegistry};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Records kept on disk (1000)
pub const DEFAULT_MAX_RECORDS: usize = 1000;

/// Lock timeout for log writes (5 seconds)
pub const DEFAULT_WRITE_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ActivityStore {
    path: PathBuf,
    locks: Arc<LockRegistry>,
    lock_options: LockOptions,
    max_records: usize,
}

impl ActivityStore {
    pub fn new(path: impl Into<PathBuf>, locks: Arc<LockRegistry>) -> Self {
        Self {
            path: path.into(),
            locks,
            lock_options: LockOptions::default().with_timeout(DEFAULT_WRITE_LOCK_TIMEOUT),
            max_records: DEFAULT_MAX_RECORDS,
        }
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records.max(1);
        self
    }

    pub fn with_lock_options(mut self, lock_options: LockOptions) -> Self {
        self.lock_options = lock_options;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    /// All records on disk, oldest first. A missing file is an empty log.
    pub async fn load(&self) -> ActivityResult<Vec<ActivityRecord>> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ActivityError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let mut records = Vec::new();
        for (index, line) in contents.split(|&b| b == b'\n').enumerate() {
            if line.trim_ascii().is_empty() {
                continue;
            }
            match serde_json::from_slice::<ActivityRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "Skipping malformed activity record at {}:{}: {e}",
                    self.path.display(),
                    index + 1
                ),
            }
        }
        Ok(records)
    }

    /// Append `batch` and truncate to the newest `max_records`. Returns the count on disk.
    pub async fn append(&self, batch: &[ActivityRecord]) -> ActivityResult<usize> {
        self.ensure_parent_dir().await?;
        self.locks
            .with_lock(&self.path, &self.lock_options, || async {
                let mut records = self.load().await?;
                records.extend_from_slice(batch);

                let excess = records.len().saturating_sub(self.max_records);
                if excess > 0 {
                    debug!(dropped = excess, "activity log truncated to retention cap");
                    records.drain(..excess);
                }

                self.write_all(&records).await?;
                Ok(records.len())
            })
            .await
    }

    /// Drop records older than `before`, or all records. Returns how many were removed.
    pub async fn clear(&self, before: Option<DateTime<Utc>>) -> ActivityResult<usize> {
        self.ensure_parent_dir().await?;
        self.locks
            .with_lock(&self.path, &self.lock_options, || async {
                let records = self.load().await?;
                let original = records.len();

                let kept: Vec<ActivityRecord> = match before {
                    Some(cutoff) => records.into_iter().filter(|r| r.timestamp >= cutoff).collect(),
                    None => Vec::new(),
                };

                self.write_all(&kept).await?;
                Ok(original - kept.len())
            })
            .await
    }

    /// The lock marker lives next to the log, so the directory must exist first.
    async fn ensure_parent_dir(&self) -> ActivityResult<()> {
        let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) else {
            return Ok(());
        };
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| ActivityError::Io {
                path: parent.to_path_buf(),
                source,
            })
    }

    async fn write_all(&self, records: &[ActivityRecord]) -> ActivityResult<()> {
        let io_err = |source| ActivityError::Io {
            path: self.path.clone(),
            source,
        };

        let mut body = String::new();
        for record in records {
            body.push_str(&serde_json::to_string(record)?);
            body.push('\n');
        }

        let mut temp_name = self.path.clone().into_os_string();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        tokio::fs::write(&temp_path, body).await.map_err(io_err)?;
        tokio::fs::rename(&temp_path, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}
