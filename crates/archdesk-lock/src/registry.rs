//! Process-wide registry of file locks keyed by canonical path

use crate::error::LockError;
use crate::lock::{FileLock, LockOptions};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Normalize a path so that different spellings of one file share a lock.
///
/// The parent directory is canonicalized when it exists; the file itself may
/// not exist yet.
pub fn canonical_lock_key(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => match parent.canonicalize() {
            Ok(parent) => parent.join(name),
            Err(_) => absolute,
        },
        _ => absolute,
    }
}

/// Owns one [`FileLock`] per path for the lifetime of the process.
///
/// Entries are created on first use and pruned when the last user releases.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<PathBuf, Arc<FileLock>>>,
}

struct Release<'a> {
    registry: &'a LockRegistry,
    key: PathBuf,
    lock: Arc<FileLock>,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.release() {
            tracing::error!("Failed to release lock {}: {err}", self.key.display());
        }
        self.registry.prune(&self.key, &self.lock);
    }
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared lock instance for `path`
    pub fn lock_for(&self, path: &Path) -> Arc<FileLock> {
        let key = canonical_lock_key(path);
        let mut locks = self.entries();
        Arc::clone(
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(FileLock::new(key))),
        )
    }

    /// Number of paths with a live entry
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `operation` while holding the lock on `path`.
    ///
    /// Fails with [`LockError::Timeout`] when the lock cannot be taken within
    /// `options.timeout`. The lock is released however `operation` ends,
    /// including when the returned future is dropped mid-way.
    pub async fn with_lock<T, E, F, Fut>(
        &self,
        path: &Path,
        options: &LockOptions,
        operation: F,
    ) -> Result<T, E>
    where
        E: From<LockError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let lock = self.lock_for(path);
        let key = lock.target().to_path_buf();

        let acquired = match lock.acquire(options).await {
            Ok(acquired) => acquired,
            Err(err) => {
                self.prune(&key, &lock);
                return Err(err.into());
            }
        };
        if !acquired {
            self.prune(&key, &lock);
            return Err(LockError::Timeout {
                path: key,
                timeout: options.timeout,
            }
            .into());
        }

        let _release = Release {
            registry: self,
            key,
            lock,
        };
        operation().await
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<FileLock>>> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop the registry entry when the only references left are the map's and the caller's.
    fn prune(&self, key: &Path, lock: &Arc<FileLock>) {
        let mut locks = self.entries();
        let unused = locks
            .get(key)
            .is_some_and(|entry| Arc::ptr_eq(entry, lock) && Arc::strong_count(lock) <= 2);
        if unused {
            locks.remove(key);
        }
    }
}
