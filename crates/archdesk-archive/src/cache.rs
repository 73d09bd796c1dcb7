//! Time-bounded cache of analysis results keyed by archive path
//!
//! Uploaded archives are treated as immutable, so a result stays valid until
//! its TTL runs out. Expired entries are dropped on read; there is no
//! background sweeper.

use crate::error::ArchiveResult;
use crate::inspector::{analyze_archive, AnalysisResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default time-to-live for cached analyses (5 minutes)
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
struct CacheEntry {
    result: Arc<AnalysisResult>,
    produced_at: Instant,
}

#[derive(Debug)]
pub struct AnalysisCache {
    ttl: Duration,
    entries: Mutex<HashMap<PathBuf, CacheEntry>>,
}

impl Default for AnalysisCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl AnalysisCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh cached result for `path`, if any
    pub fn get(&self, path: &Path) -> Option<Arc<AnalysisResult>> {
        let entries = self.entries();
        entries
            .get(path)
            .filter(|entry| entry.produced_at.elapsed() < self.ttl)
            .map(|entry| Arc::clone(&entry.result))
    }

    /// Cached result for `path`, running [`analyze_archive`] on a miss
    pub fn get_or_analyze(&self, path: &Path) -> ArchiveResult<Arc<AnalysisResult>> {
        self.get_or_insert_with(path, analyze_archive)
    }

    /// Cached result for `path`, running `scan` on a miss.
    ///
    /// Failed scans are not cached. The scan runs without the cache lock held,
    /// so two callers missing at once may both scan; the later store wins.
    pub fn get_or_insert_with<F>(&self, path: &Path, scan: F) -> ArchiveResult<Arc<AnalysisResult>>
    where
        F: FnOnce(&Path) -> ArchiveResult<AnalysisResult>,
    {
        if let Some(hit) = self.get(path) {
            return Ok(hit);
        }

        let result = Arc::new(scan(path)?);
        let now = Instant::now();

        let mut entries = self.entries();
        entries.insert(
            path.to_path_buf(),
            CacheEntry {
                result: Arc::clone(&result),
                produced_at: now,
            },
        );
        entries.retain(|_, entry| now.duration_since(entry.produced_at) < self.ttl);

        Ok(result)
    }

    pub fn invalidate(&self, path: &Path) -> bool {
        self.entries().remove(path).is_some()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Number of stored entries, expired ones included until the next store
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<PathBuf, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
