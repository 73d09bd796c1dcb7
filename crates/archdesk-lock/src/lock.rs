//! Marker-file lock for a single path

use crate::error::{LockError, LockResult};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;

/// Default time to keep trying before giving up (30 seconds)
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default pause between attempts while the marker is held (100ms)
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Markers older than this are considered abandoned (60 seconds)
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(60);

const LOCK_SUFFIX: &str = ".lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Total time to keep trying
    pub timeout: Duration,
    /// Pause between attempts
    pub retry_interval: Duration,
    /// Age after which a marker is treated as stale
    pub stale_after: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_LOCK_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            stale_after: STALE_LOCK_AGE,
        }
    }
}

impl LockOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

/// Contents of a `<path>.lock` marker file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMarker {
    /// Process id of the owner
    pub pid: u32,
    /// Creation time, unix milliseconds
    pub timestamp: i64,
    /// Path the marker protects
    #[serde(rename = "filePath")]
    pub file_path: PathBuf,
}

impl LockMarker {
    pub fn for_current_process(target: &Path) -> Self {
        Self {
            pid: std::process::id(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            file_path: target.to_path_buf(),
        }
    }

    /// Time since the marker was written (zero if the clock went backwards)
    pub fn age(&self) -> Duration {
        let now = chrono::Utc::now().timestamp_millis();
        Duration::from_millis(u64::try_from(now - self.timestamp).unwrap_or(0))
    }

    /// Stale when too old or when the owning process is gone
    pub fn is_stale(&self, stale_after: Duration) -> bool {
        self.age() > stale_after || !process_alive(self.pid)
    }
}

/// `<target>.lock`, next to the target file
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}

/// Check whether a process with this pid currently exists
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }

    // Signal 0 only checks for existence; EPERM means it exists but belongs to someone else
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    true
}

#[derive(Debug)]
enum MarkerCheck {
    Gone,
    Live,
    /// Contents at the time of the check
    Stale(Vec<u8>),
}

#[derive(Debug)]
struct HeldState {
    _local: OwnedMutexGuard<()>,
    since: Instant,
}

/// Lock on one target path.
///
/// Callers in the same process should share one instance (see
/// [`LockRegistry`](crate::LockRegistry)): the in-memory mutex queues them so
/// only the front of the queue polls the marker file.
#[derive(Debug)]
pub struct FileLock {
    target: PathBuf,
    marker_path: PathBuf,
    local: Arc<tokio::sync::Mutex<()>>,
    held: Mutex<Option<HeldState>>,
}

impl FileLock {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        let target = target.into();
        let marker_path = lock_path_for(&target);
        Self {
            target,
            marker_path,
            local: Arc::new(tokio::sync::Mutex::new(())),
            held: Mutex::new(None),
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker_path
    }

    /// Whether this instance currently holds the lock
    pub fn is_locked(&self) -> bool {
        self.held_state().is_some()
    }

    /// How long the lock has been held, zero when not held
    pub fn held_for(&self) -> Duration {
        self.held_state()
            .as_ref()
            .map_or(Duration::ZERO, |held| held.since.elapsed())
    }

    /// Try to take the lock, polling until `options.timeout` has elapsed.
    ///
    /// Returns `Ok(false)` on timeout. Stale markers are removed and
    /// acquisition retried immediately. I/O errors other than "marker already
    /// exists" are returned as errors.
    ///
    /// The marker is written in full to a private temp file and then hard
    /// linked into place, so other processes never observe a partial marker.
    pub async fn acquire(&self, options: &LockOptions) -> LockResult<bool> {
        let started = tokio::time::Instant::now();
        let deadline = started + options.timeout;

        let local = match tokio::time::timeout_at(deadline, Arc::clone(&self.local).lock_owned())
            .await
        {
            Ok(guard) => guard,
            Err(_) => return Ok(false),
        };

        loop {
            match self.create_marker().await {
                Ok(()) => {
                    *self.held_state() = Some(HeldState {
                        _local: local,
                        since: Instant::now(),
                    });
                    tracing::debug!(path = %self.target.display(), "lock acquired");
                    return Ok(true);
                }
                Err(LockError::Io { source, .. }) if source.kind() == io::ErrorKind::AlreadyExists => {
                    match self.check_marker(options.stale_after).await? {
                        MarkerCheck::Gone => continue,
                        MarkerCheck::Stale(judged) => {
                            if self.remove_stale_marker(&judged).await? {
                                tracing::warn!(
                                    marker = %self.marker_path.display(),
                                    "removed stale lock marker"
                                );
                            }
                            continue;
                        }
                        MarkerCheck::Live => {}
                    }

                    let now = tokio::time::Instant::now();
                    if now + options.retry_interval > deadline {
                        tracing::debug!(
                            path = %self.target.display(),
                            waited_ms = now.duration_since(started).as_millis() as u64,
                            "lock acquisition timed out"
                        );
                        return Ok(false);
                    }
                    tokio::time::sleep(options.retry_interval).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Release the lock if this instance holds it. Calling it again is a no-op.
    pub fn release(&self) -> LockResult<()> {
        let Some(held) = self.held_state().take() else {
            return Ok(());
        };

        let removed = self.remove_marker();
        tracing::debug!(
            path = %self.target.display(),
            held_ms = held.since.elapsed().as_millis() as u64,
            "lock released"
        );
        // Dropping `held` lets the next in-process waiter through.
        drop(held);
        removed
    }

    fn held_state(&self) -> MutexGuard<'_, Option<HeldState>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn io_error(&self, source: io::Error) -> LockError {
        LockError::Io {
            path: self.marker_path.clone(),
            source,
        }
    }

    async fn create_marker(&self) -> LockResult<()> {
        let marker = LockMarker::for_current_process(&self.target);
        let contents = serde_json::to_vec(&marker)?;

        let mut staging = self.marker_path.clone().into_os_string();
        staging.push(format!(".{}.{}.tmp", marker.pid, uuid::Uuid::new_v4().simple()));
        let staging = PathBuf::from(staging);

        if let Err(source) = tokio::fs::write(&staging, &contents).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(self.io_error(source));
        }
        // The link fails with AlreadyExists while another owner holds the marker.
        let linked = tokio::fs::hard_link(&staging, &self.marker_path).await;
        if let Err(err) = tokio::fs::remove_file(&staging).await {
            tracing::debug!(path = %staging.display(), "failed to remove staging marker: {err}");
        }
        linked.map_err(|source| self.io_error(source))
    }

    /// Unparseable markers count as stale.
    async fn check_marker(&self, stale_after: Duration) -> LockResult<MarkerCheck> {
        let bytes = match tokio::fs::read(&self.marker_path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(MarkerCheck::Gone),
            Err(source) => return Err(self.io_error(source)),
        };
        let stale = match serde_json::from_slice::<LockMarker>(&bytes) {
            Ok(marker) => marker.is_stale(stale_after),
            Err(_) => true,
        };
        Ok(if stale {
            MarkerCheck::Stale(bytes)
        } else {
            MarkerCheck::Live
        })
    }

    /// Remove the marker only if it still holds the bytes that were judged
    /// stale. Returns whether it was removed.
    async fn remove_stale_marker(&self, judged: &[u8]) -> LockResult<bool> {
        match tokio::fs::read(&self.marker_path).await {
            Ok(current) if current == judged => {}
            Ok(_) => return Ok(false),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(source) => return Err(self.io_error(source)),
        }
        match tokio::fs::remove_file(&self.marker_path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn remove_marker(&self) -> LockResult<()> {
        match std::fs::remove_file(&self.marker_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(self.io_error(source)),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::error!("Failed to release lock on drop: {err}");
        }
    }
}
