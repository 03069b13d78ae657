//! # Project Save Locks
//!
//! A project file on a shared drive may be open in several Modsee sessions.
//! Before writing, a session takes a [`ProjectLock`]: an OS lock (fs2) on a
//! sidecar file plus a [`LockHolder`] record in that file, so other sessions
//! can tell who is saving and since when.
//!
//! The OS lock decides between processes on one machine. The holder record
//! covers machines whose OS locks do not see each other; it is only
//! rewritten once the OS lock is ours.
//!
//! `frame.msee` is locked through `frame.msee.lock`.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::errors::{ModelError, ModelResult};

/// A holder record older than this no longer blocks anyone.
const HOLDER_EXPIRY_HOURS: i64 = 24;

/// The session recorded in a lock file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockHolder {
    /// Engineer or account name shown to other sessions
    pub user: String,
    pub machine: String,
    pub pid: u32,
    pub since: DateTime<Utc>,
}

impl LockHolder {
    /// Holder record for this process.
    pub fn current(user: impl Into<String>) -> Self {
        LockHolder {
            user: user.into(),
            machine: machine_name(),
            pid: std::process::id(),
            since: Utc::now(),
        }
    }

    /// An expired record, or one left by a dead process on this machine.
    pub fn is_stale(&self) -> bool {
        if Utc::now() - self.since > Duration::hours(HOLDER_EXPIRY_HOURS) {
            return true;
        }
        self.machine == machine_name() && !process_alive(self.pid)
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.user, self.machine)
    }
}

fn machine_name() -> String {
    ["HOSTNAME", "COMPUTERNAME", "HOST"]
        .iter()
        .find_map(|key| std::env::var(key).ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let proc = Path::new("/proc");
    pid == std::process::id() || !proc.is_dir() || proc.join(pid.to_string()).exists()
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// `frame.msee` -> `frame.msee.lock`
pub fn lock_path_for(project_path: &Path) -> PathBuf {
    let mut lock_path = project_path.as_os_str().to_owned();
    lock_path.push(".lock");
    PathBuf::from(lock_path)
}

fn parse_holder(contents: &str) -> Option<LockHolder> {
    serde_json::from_str(contents).ok()
}

/// Exclusive right to write one project file. Released on drop.
#[derive(Debug)]
pub struct ProjectLock {
    project_path: PathBuf,
    lock_path: PathBuf,
    file: File,
    pub holder: LockHolder,
}

impl ProjectLock {
    /// Lock `project_path` for `user`.
    ///
    /// Fails with [`ModelError::FileLocked`] when another session holds the
    /// OS lock or a live holder record names someone else. Stale records
    /// are taken over. A failed attempt never touches the lock file.
    pub fn acquire(project_path: &Path, user: impl Into<String>) -> ModelResult<Self> {
        let lock_path = lock_path_for(project_path);
        let file_error = |operation: &str, e: std::io::Error| {
            ModelError::file_error(operation, lock_path.display().to_string(), e.to_string())
        };
        let locked_by = |holder: Option<LockHolder>| match holder {
            Some(holder) => ModelError::file_locked(
                project_path.display().to_string(),
                holder.describe(),
                holder.since.to_rfc3339(),
            ),
            None => ModelError::file_locked(project_path.display().to_string(), "another session", "unknown"),
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| file_error("open lock", e))?;

        if file.try_lock_exclusive().is_err() {
            return Err(locked_by(ProjectLock::holder(project_path)));
        }

        let mut previous = String::new();
        file.read_to_string(&mut previous).map_err(|e| file_error("read lock", e))?;
        match parse_holder(&previous) {
            Some(existing) if !existing.is_stale() => {
                let _ = fs2::FileExt::unlock(&file);
                return Err(locked_by(Some(existing)));
            }
            Some(existing) => {
                tracing::warn!(
                    path = %project_path.display(),
                    holder = %existing.describe(),
                    "taking over stale project lock"
                );
            }
            None => {}
        }

        let holder = LockHolder::current(user);
        let record = serde_json::to_vec_pretty(&holder)
            .map_err(|e| ModelError::serialization(lock_path.display().to_string(), e.to_string()))?;
        file.set_len(0).map_err(|e| file_error("truncate lock", e))?;
        file.seek(SeekFrom::Start(0)).map_err(|e| file_error("rewind lock", e))?;
        file.write_all(&record).map_err(|e| file_error("write lock", e))?;
        file.sync_all().map_err(|e| file_error("sync lock", e))?;

        tracing::debug!(path = %project_path.display(), user = %holder.user, "project locked");
        Ok(ProjectLock {
            project_path: project_path.to_path_buf(),
            lock_path,
            file,
            holder,
        })
    }

    /// The live holder of `project_path`, if any.
    pub fn holder(project_path: &Path) -> Option<LockHolder> {
        let contents = fs::read_to_string(lock_path_for(project_path)).ok()?;
        parse_holder(&contents).filter(|holder| !holder.is_stale())
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
