// ABOUTME: Single-daemon lock on the state directory.
// ABOUTME: Atomic file creation with holder info; stale once not refreshed for five minutes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::StoreError;
use super::error::IoSnafu;

const LOCK_FILE: &str = "daemon.lock";
const STALE_AFTER_MINUTES: i64 = 5;

/// Information about who holds the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Hostname of the machine that holds the lock.
    pub holder: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub refreshed_at: DateTime<Utc>,
}

impl LockInfo {
    /// Lock info for the current process.
    pub fn current() -> Self {
        let now = Utc::now();
        Self {
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            started_at: now,
            refreshed_at: now,
        }
    }

    /// A holder that stopped refreshing has most likely died.
    pub fn is_stale(&self) -> bool {
        Utc::now() - self.refreshed_at >= chrono::Duration::minutes(STALE_AFTER_MINUTES)
    }
}

/// A held lock. Released on drop.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
    info: LockInfo,
    released: bool,
}

impl StateLock {
    pub fn path_in(state_dir: &Path) -> PathBuf {
        state_dir.join(LOCK_FILE)
    }

    /// Acquire the lock for `state_dir`.
    ///
    /// A stale lock, or any lock when `force` is set, is broken with a
    /// warning. Returns `StoreError::Locked` when another live holder has it.
    pub fn acquire(state_dir: &Path, force: bool) -> Result<Self, StoreError> {
        fs::create_dir_all(state_dir).context(IoSnafu { path: state_dir })?;
        let path = Self::path_in(state_dir);
        let info = LockInfo::current();

        if Self::try_create(&path, &info)? {
            return Ok(Self {
                path,
                info,
                released: false,
            });
        }

        let existing = Self::read(state_dir)?;
        match &existing {
            Some(held) if !held.is_stale() && !force => {
                return Err(StoreError::Locked {
                    holder: held.holder.clone(),
                    pid: held.pid,
                    since: held.started_at,
                });
            }
            Some(held) => {
                tracing::warn!(
                    holder = %held.holder,
                    pid = held.pid,
                    "breaking {} state lock",
                    if force { "forced" } else { "stale" }
                );
            }
            None => tracing::warn!("breaking unreadable state lock"),
        }

        let _ = fs::remove_file(&path);
        if !Self::try_create(&path, &info)? {
            let held = Self::read(state_dir)?.unwrap_or_else(LockInfo::current);
            return Err(StoreError::Locked {
                holder: held.holder,
                pid: held.pid,
                since: held.started_at,
            });
        }

        Ok(Self {
            path,
            info,
            released: false,
        })
    }

    /// Current holder of the lock for `state_dir`, if any.
    pub fn read(state_dir: &Path) -> Result<Option<LockInfo>, StoreError> {
        let path = Self::path_in(state_dir);
        match fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Record that the holder is still alive.
    pub fn refresh(&mut self) -> Result<(), StoreError> {
        self.info.refreshed_at = Utc::now();
        let tmp = self.path.with_extension("lock.tmp");
        let bytes = serde_json::to_vec(&self.info).unwrap_or_default();
        fs::write(&tmp, bytes).context(IoSnafu { path: &tmp })?;
        fs::rename(&tmp, &self.path).context(IoSnafu { path: &self.path })?;
        Ok(())
    }

    pub fn release(mut self) -> Result<(), StoreError> {
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn try_create(path: &Path, info: &LockInfo) -> Result<bool, StoreError> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let bytes = serde_json::to_vec(info).unwrap_or_default();
        file.write_all(&bytes).context(IoSnafu { path })?;
        Ok(true)
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = fs::remove_file(&self.path);
        }
    }
}
