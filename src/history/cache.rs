// src/history/cache.rs

//! Bounded, TTL-evicting cache of parsed status files.
//!
//! Entries are keyed by path and validated against the file's modification
//! time, so a rewritten file is re-parsed on the next access. Writers call
//! [`FileCache::invalidate`] explicitly after mutating a file; the mtime
//! check covers everything else.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant, SystemTime};

use tracing::debug;

use crate::history::status::Status;
use crate::history::StoreError;

#[derive(Debug, Clone)]
struct CacheEntry {
    status: Status,
    mtime: SystemTime,
    last_access: Instant,
}

type CacheMap = HashMap<PathBuf, CacheEntry>;

/// Cache of parsed status files. Internally synchronized; clones share the
/// same map.
#[derive(Debug, Clone)]
pub struct FileCache {
    entries: Arc<Mutex<CacheMap>>,
    capacity: usize,
    ttl: Duration,
}

impl FileCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            capacity,
            ttl,
        }
    }

    /// Return the cached status for `path` if its stored mtime still matches
    /// the file's; otherwise run `loader`, store the result, and return it.
    pub fn load_latest<F>(&self, path: &Path, loader: F) -> Result<Status, StoreError>
    where
        F: FnOnce() -> Result<Status, StoreError>,
    {
        let mtime = std::fs::metadata(path)?.modified()?;

        {
            let mut entries = self.lock();
            if let Some(entry) = entries.get_mut(path) {
                if entry.mtime == mtime {
                    entry.last_access = Instant::now();
                    return Ok(entry.status.clone());
                }
            }
        }

        let status = loader()?;

        let mut entries = self.lock();
        entries.insert(
            path.to_path_buf(),
            CacheEntry {
                status: status.clone(),
                mtime,
                last_access: Instant::now(),
            },
        );
        enforce_capacity(&mut entries, self.capacity);

        Ok(status)
    }

    /// Drop any entry for `path`.
    pub fn invalidate(&self, path: &Path) {
        let mut entries = self.lock();
        if entries.remove(path).is_some() {
            debug!(path = ?path, "invalidated cached status");
        }
    }

    /// Number of live entries. Exposed for tests and diagnostics.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Start the background eviction loop. The thread wakes once a minute,
    /// drops entries not accessed within the TTL, and exits on its own once
    /// every handle to the cache is gone.
    pub fn start_eviction(&self) {
        let weak: Weak<Mutex<CacheMap>> = Arc::downgrade(&self.entries);
        let ttl = self.ttl;

        std::thread::spawn(move || loop {
            std::thread::sleep(Duration::from_secs(60));
            let Some(entries) = weak.upgrade() else {
                break;
            };
            let mut entries = entries.lock().unwrap_or_else(|e| e.into_inner());
            let before = entries.len();
            entries.retain(|_, entry| entry.last_access.elapsed() < ttl);
            let evicted = before - entries.len();
            if evicted > 0 {
                debug!(evicted, remaining = entries.len(), "evicted expired cache entries");
            }
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheMap> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Drop the least-recently-accessed entries until the map fits.
fn enforce_capacity(entries: &mut CacheMap, capacity: usize) {
    while entries.len() > capacity {
        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(path, _)| path.clone());
        match oldest {
            Some(path) => {
                entries.remove(&path);
                debug!(path = ?path, "evicted cache entry over capacity");
            }
            None => break,
        }
    }
}
