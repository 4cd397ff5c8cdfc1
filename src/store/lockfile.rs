// ABOUTME: Cross-process lock files created atomically inside the state directory.
// ABOUTME: The holder's pid and start time live in the file; stale or dead holders are broken.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::StoreResult;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A lock file that is still empty or half written is only broken after this.
const UNREADABLE_GRACE: Duration = Duration::from_secs(2);

/// Who holds a lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub purpose: String,
}

impl LockInfo {
    pub fn new(purpose: &str) -> Self {
        Self {
            pid: std::process::id(),
            started_at: Utc::now(),
            purpose: purpose.to_string(),
        }
    }

    pub fn is_stale(&self, after: Duration) -> bool {
        let age = Utc::now() - self.started_at;
        age.to_std().map(|age| age >= after).unwrap_or(false)
    }
}

/// An exclusively created lock file, removed on release or drop.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    released: bool,
}

impl LockFile {
    /// Wait until `path` can be created exclusively.
    ///
    /// An existing lock is broken when it is older than `stale_after`, when
    /// its holder process is gone, or when it stays unreadable.
    pub async fn acquire(path: &Path, purpose: &str, stale_after: Duration) -> StoreResult<Self> {
        let contents = serde_json::to_vec(&LockInfo::new(purpose))?;
        let mut announced = false;

        loop {
            let created = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .await;
            match created {
                Ok(mut file) => {
                    let lock = Self {
                        path: path.to_path_buf(),
                        released: false,
                    };
                    file.write_all(&contents).await?;
                    file.flush().await?;
                    return Ok(lock);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if should_break(path, stale_after).await {
                        match tokio::fs::remove_file(path).await {
                            Ok(()) => {}
                            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                            Err(e) => return Err(e.into()),
                        }
                        continue;
                    }
                    if !announced {
                        debug!(path = %path.display(), purpose, "waiting for lock file");
                        announced = true;
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn release(mut self) -> StoreResult<()> {
        self.released = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "failed to remove lock file");
        }
    }
}

async fn should_break(path: &Path, stale_after: Duration) -> bool {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        // Released between our create attempt and this read.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return false,
        Err(_) => return unreadable_for_long(path).await,
    };
    let Ok(existing) = serde_json::from_slice::<LockInfo>(&bytes) else {
        if unreadable_for_long(path).await {
            warn!(path = %path.display(), "lock file corrupted, breaking lock");
            return true;
        }
        return false;
    };

    if existing.is_stale(stale_after) {
        warn!(
            path = %path.display(),
            pid = existing.pid,
            since = %existing.started_at,
            "breaking stale lock"
        );
        return true;
    }
    if !holder_alive(existing.pid).await {
        warn!(
            path = %path.display(),
            pid = existing.pid,
            "lock holder is gone, breaking lock"
        );
        return true;
    }
    false
}

async fn unreadable_for_long(path: &Path) -> bool {
    match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified
            .elapsed()
            .map(|age| age >= UNREADABLE_GRACE)
            .unwrap_or(false),
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
async fn holder_alive(pid: u32) -> bool {
    tokio::fs::try_exists(format!("/proc/{pid}"))
        .await
        .unwrap_or(true)
}

#[cfg(not(target_os = "linux"))]
async fn holder_alive(_pid: u32) -> bool {
    true
}
