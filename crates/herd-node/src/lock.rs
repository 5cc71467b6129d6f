// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Process-wide instance lock.
//!
//! One engine process per storage directory: the lock file holds the
//! holder's pid and port.  A lock is stale iff the OS no longer knows the
//! pid; stale files are cleaned before acquisition.  The file is created
//! with `create_new` so two racing processes cannot both win.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use herd_model::{Error, Result};

/// Serialized lock record (§ instance lock contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub pid: u32,
    /// ISO-8601.
    pub started_at: String,
    pub port: u16,
    pub runtime_version: String,
    pub instance_id: String,
}

#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    held: bool,
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    // kill(pid, 0) probes existence without signalling.  EPERM still means
    // the process exists.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    // No portable probe; treat foreign locks as live so we never steal one.
    true
}

fn read_record(path: &Path) -> Option<LockRecord> {
    let text = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

impl InstanceLock {
    /// Acquire the lock, cleaning a stale file first.  Fails with
    /// [`Error::InstanceAlreadyRunning`] when a live holder exists.
    pub fn acquire(path: &Path, port: u16) -> Result<Self> {
        if path.exists() {
            match read_record(path) {
                Some(record) if pid_alive(record.pid) => {
                    return Err(Error::InstanceAlreadyRunning {
                        pid: record.pid,
                        port: record.port,
                    });
                }
                Some(record) => {
                    info!(pid = record.pid, "removing stale instance lock");
                    std::fs::remove_file(path).map_err(|e| Error::io(path, e))?;
                }
                None => {
                    warn!(path = %path.display(), "removing unreadable instance lock");
                    std::fs::remove_file(path).map_err(|e| Error::io(path, e))?;
                }
            }
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
        }

        let record = LockRecord {
            pid: std::process::id(),
            started_at: Utc::now().to_rfc3339(),
            port,
            runtime_version: env!("CARGO_PKG_VERSION").to_string(),
            instance_id: Uuid::new_v4().to_string(),
        };
        let body = serde_json::to_string_pretty(&record)
            .map_err(|e| Error::Storage(format!("serialize lock record: {e}")))?;

        // create_new is the atomicity guarantee: the loser of a race gets
        // AlreadyExists and reports the winner.
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(mut file) => {
                use std::io::Write;
                file.write_all(body.as_bytes())
                    .map_err(|e| Error::io(path, e))?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = read_record(path);
                return Err(Error::InstanceAlreadyRunning {
                    pid: holder.as_ref().map(|r| r.pid).unwrap_or(0),
                    port: holder.map(|r| r.port).unwrap_or(0),
                });
            }
            Err(e) => return Err(Error::io(path, e)),
        }

        info!(path = %path.display(), pid = record.pid, "instance lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            held: true,
        })
    }

    /// Delete the lock file.  Idempotent.
    pub fn release(&mut self) -> Result<()> {
        if !self.held {
            return Ok(());
        }
        self.held = false;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "instance lock released");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(&self.path, e)),
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if self.held {
            if let Err(e) = self.release() {
                warn!("instance lock release on drop failed: {e}");
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("herd.pid")
    }

    #[test]
    fn acquire_writes_a_full_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        let _lock = InstanceLock::acquire(&path, 3000).unwrap();

        let record = read_record(&path).unwrap();
        assert_eq!(record.pid, std::process::id());
        assert_eq!(record.port, 3000);
        assert!(!record.instance_id.is_empty());
        assert!(!record.runtime_version.is_empty());
    }

    #[test]
    fn second_acquire_reports_the_live_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        let _lock = InstanceLock::acquire(&path, 3000).unwrap();

        let err = InstanceLock::acquire(&path, 3001).unwrap_err();
        match err {
            Error::InstanceAlreadyRunning { pid, port } => {
                assert_eq!(pid, std::process::id());
                assert_eq!(port, 3000);
            }
            other => panic!("expected InstanceAlreadyRunning, got {other:?}"),
        }
    }

    #[test]
    fn stale_lock_is_cleaned_and_reacquired() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);

        // A child that has already exited gives us a genuinely dead pid.
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();

        let stale = LockRecord {
            pid: dead_pid,
            started_at: Utc::now().to_rfc3339(),
            port: 4000,
            runtime_version: "0.0.0".into(),
            instance_id: "stale".into(),
        };
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        let _lock = InstanceLock::acquire(&path, 3000).unwrap();
        let record = read_record(&path).unwrap();
        assert_eq!(record.pid, std::process::id());
    }

    #[test]
    fn unreadable_lock_is_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        std::fs::write(&path, "{not json").unwrap();
        let _lock = InstanceLock::acquire(&path, 3000).unwrap();
    }

    #[test]
    fn release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        let mut lock = InstanceLock::acquire(&path, 3000).unwrap();
        lock.release().unwrap();
        lock.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn drop_releases_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_path(&dir);
        {
            let _lock = InstanceLock::acquire(&path, 3000).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
