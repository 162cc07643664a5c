// Structured errors for the session engine. The orchestrator and the binary
// are the only places that decide between "log and continue" and "terminate".

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from the instance lock manager.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process already holds the lock for this path. Expected and
    /// non-fatal: the caller exits with status 0.
    #[error("another session already has {} open", .path.display())]
    AlreadyRunning { path: PathBuf },

    #[error("failed to create lock directory {}", .dir.display())]
    LockDir {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A stale lock file could not be removed during forced takeover. There
    /// is no path forward from this, so startup aborts.
    #[error("failed to remove stale lock file {}", .path.display())]
    StaleRemoval {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The lock file reappeared between the forced cleanup and the retry.
    /// The retry is bounded to one attempt, so this is fatal.
    #[error("lock file {} reappeared during forced takeover", .path.display())]
    Contended { path: PathBuf },

    #[error("lock file operation failed")]
    Io(#[from] io::Error),
}

impl LockError {
    pub fn is_already_running(&self) -> bool {
        matches!(self, LockError::AlreadyRunning { .. })
    }
}

/// Errors while decoding inbound command frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("editor closed the connection mid-frame")]
    UnexpectedEof,

    #[error("invalid data byte count {value:?}")]
    BadByteCount { value: String },

    #[error("save refers to unknown token {token}")]
    UnknownToken { token: String },

    #[error("protocol read failed")]
    Io(#[from] io::Error),
}
