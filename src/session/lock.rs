// Instance lock manager: filesystem-mediated mutual exclusion over one
// target path. The exclusivity primitive is "create file if absent", which
// is atomic at the filesystem level, so no process-local locking is needed.
//
// The lock file lives in a shared directory, is named after a digest of the
// case-normalized absolute target path, and contains the owner's PID.

use crate::session::error::LockError;
use log::{debug, warn};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// How long a forced takeover waits for the signaled owner to exit before
/// deleting its lock file anyway.
const EXIT_POLL_TIMEOUT: Duration = Duration::from_secs(2);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Handle for an acquired lock. Releasing is idempotent and also happens
/// best-effort on drop; failures during release are logged, not escalated,
/// because the process is exiting anyway.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    released: bool,
}

/// Digest of the case-normalized absolute form of `target`, used as the
/// lock file name. 32 hex characters.
pub fn path_digest(target: &Path) -> io::Result<String> {
    let abs = std::path::absolute(target)?;
    let normalized = abs.to_string_lossy().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    Ok(hex::encode(&hasher.finalize()[..16]))
}

/// Acquire the instance lock for `target`, creating `lock_dir` if absent.
///
/// Without `force`, an existing lock file means another session owns the
/// path and `LockError::AlreadyRunning` is returned. With `force`, the
/// recorded owner is signaled to terminate, given a bounded window to exit,
/// and its lock file is removed; acquisition is then retried exactly once.
pub fn acquire(target: &Path, force: bool, lock_dir: &Path) -> Result<InstanceLock, LockError> {
    fs::create_dir_all(lock_dir).map_err(|source| LockError::LockDir {
        dir: lock_dir.to_path_buf(),
        source,
    })?;

    let digest = path_digest(target)?;
    let lock_path = lock_dir.join(digest);
    debug!("lock file: {}", lock_path.display());

    match try_create(&lock_path) {
        Ok(lock) => Ok(lock),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            if !force {
                return Err(LockError::AlreadyRunning {
                    path: target.to_path_buf(),
                });
            }
            take_over(&lock_path)?;
            match try_create(&lock_path) {
                Ok(lock) => Ok(lock),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(LockError::Contended {
                    path: lock_path.clone(),
                }),
                Err(e) => Err(e.into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

fn try_create(lock_path: &Path) -> io::Result<InstanceLock> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)?;
    if let Err(e) = file.write_all(std::process::id().to_string().as_bytes()) {
        drop(file);
        let _ = fs::remove_file(lock_path);
        return Err(e);
    }
    debug!("created lock file {}", lock_path.display());
    Ok(InstanceLock {
        path: lock_path.to_path_buf(),
        released: false,
    })
}

/// Evict the current owner of an existing lock file and remove the file.
/// Only the removal failure is fatal; every problem with the owner itself
/// is treated as "already stale".
fn take_over(lock_path: &Path) -> Result<(), LockError> {
    match fs::read_to_string(lock_path) {
        Ok(content) => match content.trim().parse::<i32>() {
            Ok(pid) if pid > 0 => terminate_owner(pid),
            _ => warn!(
                "lock file {} has no usable owner pid, removing it",
                lock_path.display()
            ),
        },
        Err(e) => warn!("failed to read lock file {}: {e}", lock_path.display()),
    }

    match fs::remove_file(lock_path) {
        Ok(()) => Ok(()),
        // The owner won the race and cleaned up after itself.
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(LockError::StaleRemoval {
            path: lock_path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(unix)]
fn terminate_owner(pid: i32) {
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => debug!("lock owner {pid} is already gone"),
            Some(libc::EPERM) => {
                warn!("no permission to signal lock owner {pid}, assuming it is stale")
            }
            _ => warn!("failed to signal lock owner {pid}: {err}"),
        }
        return;
    }

    // The owner was signaled; wait a bounded time for it to exit so the
    // lock file is not deleted out from under a process mid-shutdown.
    let deadline = Instant::now() + EXIT_POLL_TIMEOUT;
    while Instant::now() < deadline {
        if unsafe { libc::kill(pid, 0) } != 0 {
            debug!("lock owner {pid} exited");
            return;
        }
        std::thread::sleep(EXIT_POLL_INTERVAL);
    }
    warn!("lock owner {pid} did not exit within {EXIT_POLL_TIMEOUT:?}, proceeding");
}

#[cfg(not(unix))]
fn terminate_owner(pid: i32) {
    warn!("cannot probe process {pid} on this platform, assuming it is stale");
}

impl InstanceLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock file. Safe to call more than once; a file that is
    /// already gone is not an error.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("released lock {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove lock file {}: {e}", self.path.display()),
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        self.release();
    }
}
