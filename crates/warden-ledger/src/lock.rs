//! The `ledger.lock` marker.
//!
//! Whoever creates the file holds the lock. The file names its holder and
//! when it was taken, so a marker left behind by a crashed writer can be
//! recognised as stale and reclaimed.
//!
//! Reclaiming is a read followed by a remove, so it runs under an exclusive
//! `flock` on a sidecar file (`ledger.reclaim`). A contender that judged a
//! marker stale can then never remove the fresh marker of the writer that
//! reclaimed it first. The sidecar is never deleted.

use std::{
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    thread,
};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use warden_contracts::error::{WardenError, WardenResult};

use crate::options::LedgerOptions;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMarker {
    pub holder: Uuid,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl LockMarker {
    fn is_stale(&self, options: &LedgerOptions, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.acquired_at);
        age.num_milliseconds() > options.lock_stale_after_ms as i64
    }
}

/// A held lock. Dropping it removes the marker, if it is still ours.
#[derive(Debug)]
pub struct LedgerLock {
    path: PathBuf,
    holder: Uuid,
}

impl LedgerLock {
    /// Take the lock, waiting with bounded backoff while another writer
    /// holds it.
    pub fn acquire(path: &Path, holder: Uuid, options: &LedgerOptions) -> WardenResult<Self> {
        let retry = options.lock_retry;
        let mut last_seen: Option<LockMarker> = None;

        for attempt in 1..=retry.attempts {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let marker = LockMarker {
                        holder,
                        pid: std::process::id(),
                        acquired_at: Utc::now(),
                    };
                    let bytes = serde_json::to_vec(&marker).map_err(|e| {
                        WardenError::SerializationError {
                            reason: format!("failed to encode lock marker: {}", e),
                        }
                    })?;
                    let written = file.write_all(&bytes).and_then(|()| file.sync_data());
                    if let Err(e) = written {
                        let _ = fs::remove_file(path);
                        return Err(io_error("write lock marker", path, e));
                    }
                    debug!(holder = %holder, attempt, "ledger lock acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                        holder,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if reclaim_if_stale(path, options)? {
                        continue;
                    }
                    last_seen = read_marker(path);
                }
                Err(e) => return Err(io_error("create lock marker", path, e)),
            }

            if attempt < retry.attempts {
                thread::sleep(retry.backoff(attempt));
            }
        }

        Err(WardenError::LockContended {
            holder: last_seen
                .as_ref()
                .map_or_else(|| "unknown".to_string(), |m| m.holder.to_string()),
            acquired_at: last_seen
                .as_ref()
                .map_or_else(|| "unknown".to_string(), |m| m.acquired_at.to_rfc3339()),
        })
    }

    pub fn holder(&self) -> Uuid {
        self.holder
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        match read_marker(&self.path) {
            Some(marker) if marker.holder == self.holder => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!(path = %self.path.display(), error = %e, "failed to release ledger lock");
                }
            }
            Some(marker) => warn!(
                holder = %self.holder,
                current = %marker.holder,
                "ledger lock was reclaimed while held"
            ),
            None => {}
        }
    }
}

/// Read the marker at `path`, if it exists and parses.
pub fn read_marker(path: &Path) -> Option<LockMarker> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Remove a stale marker. Returns whether the marker is gone.
///
/// A marker that cannot be parsed is judged by the file's modification
/// time instead, so a writer that died mid-write does not wedge the ledger.
/// While another contender is reclaiming, this backs off and reports
/// `false`.
fn reclaim_if_stale(path: &Path, options: &LedgerOptions) -> WardenResult<bool> {
    let Some(_guard) = ReclaimGuard::try_acquire(path)? else {
        return Ok(false);
    };
    let now = Utc::now();
    let stale = match read_marker(path) {
        Some(marker) if marker.is_stale(options, now) => {
            warn!(
                holder = %marker.holder,
                pid = marker.pid,
                acquired_at = %marker.acquired_at,
                "reclaiming stale ledger lock"
            );
            true
        }
        Some(_) => false,
        None => {
            let modified = fs::metadata(path).and_then(|m| m.modified());
            match modified {
                Ok(modified) => {
                    let age = DateTime::<Utc>::from(modified);
                    let stale = now.signed_duration_since(age).num_milliseconds()
                        > options.lock_stale_after_ms as i64;
                    if stale {
                        warn!(path = %path.display(), "reclaiming unreadable ledger lock");
                    }
                    stale
                }
                // Removed between our create attempt and now.
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
                Err(_) => false,
            }
        }
    };

    if stale {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_error("remove stale lock", path, e)),
        }
    }
    Ok(stale)
}

/// Exclusive `flock` on the sidecar, released on drop or process exit.
struct ReclaimGuard {
    file: File,
}

impl ReclaimGuard {
    fn try_acquire(lock_path: &Path) -> WardenResult<Option<Self>> {
        let path = lock_path.with_extension("reclaim");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| io_error("open reclaim guard", &path, e))?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                debug!(path = %path.display(), "stale lock is being reclaimed elsewhere");
                Ok(None)
            }
            Err(e) => Err(io_error("lock reclaim guard", &path, e)),
        }
    }
}

impl Drop for ReclaimGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

pub(crate) fn io_error(action: &str, path: &Path, e: std::io::Error) -> WardenError {
    WardenError::LedgerIo {
        reason: format!("failed to {} '{}': {}", action, path.display(), e),
    }
}
