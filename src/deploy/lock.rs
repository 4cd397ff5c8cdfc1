// ABOUTME: Per-service serialization lock for deploy-critical sections.
// ABOUTME: Keyed in-process mutexes, optionally backed by a lock file per service for other processes.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::store::{LockFile, StoreResult};

type Slot = Arc<tokio::sync::Mutex<()>>;

/// Lock files older than this are assumed abandoned.
const LOCK_FILE_STALE_AFTER: Duration = Duration::from_secs(60 * 60);

/// Serializes critical sections that touch the same service.
///
/// Sections for different keys run in parallel. The lock is released when the
/// section's future completes, whatever it returns, or when it is dropped.
/// With a lock directory, sections also exclude other processes sharing it.
#[derive(Debug, Clone, Default)]
pub struct ServiceLocks {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    lock_dir: Option<PathBuf>,
}

/// Returns the slot to the map when the section ends or is dropped.
struct SlotRelease<'a> {
    locks: &'a ServiceLocks,
    key: &'a str,
    slot: Slot,
}

impl Drop for SlotRelease<'_> {
    fn drop(&mut self) {
        let mut slots = self.locks.slots.lock();
        // The map and this guard are the only owners: no holder, no waiter.
        if let Some(existing) = slots.get(self.key)
            && Arc::ptr_eq(existing, &self.slot)
            && Arc::strong_count(&self.slot) == 2
        {
            slots.remove(self.key);
        }
    }
}

impl ServiceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also take `<dir>/<key>.lock` for every section.
    pub fn with_lock_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            slots: Default::default(),
            lock_dir: Some(dir.into()),
        }
    }

    /// Run `section` while holding the lock for `key`.
    ///
    /// Only fails when the lock file cannot be created.
    pub async fn with_lock<F, T>(&self, key: &str, section: F) -> StoreResult<T>
    where
        F: Future<Output = T>,
    {
        let entry = SlotRelease {
            locks: self,
            key,
            slot: self.slots.lock().entry(key.to_string()).or_default().clone(),
        };

        let waited = Instant::now();
        let _held = entry.slot.lock().await;
        let file = match &self.lock_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                let path = dir.join(format!("{}.lock", lock_file_stem(key)));
                Some(LockFile::acquire(&path, key, LOCK_FILE_STALE_AFTER).await?)
            }
            None => None,
        };
        let elapsed = waited.elapsed();
        if elapsed.as_millis() > 0 {
            debug!(key, waited_ms = elapsed.as_millis() as u64, "acquired service lock");
        }

        let output = section.await;

        if let Some(file) = file
            && let Err(e) = file.release().await
        {
            warn!(key, error = %e, "failed to remove service lock file");
        }
        Ok(output)
    }

    /// Number of keys with a live slot.
    pub fn held_keys(&self) -> usize {
        self.slots.lock().len()
    }
}

fn lock_file_stem(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
