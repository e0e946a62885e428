use std::path::PathBuf;

/// Base error type for git-utils operations.
#[derive(Debug, thiserror::Error)]
pub enum UtilError {
    #[error("lock file error: {0}")]
    Lock(#[from] LockError),

    #[error("date parse error: {0}")]
    DateParse(String),

    #[error("path error: {0}")]
    Path(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Lock file specific errors.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("unable to create lock file '{path}': already locked")]
    AlreadyLocked { path: PathBuf },

    #[error("unable to create lock file '{path}': {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to commit lock file '{path}': {source}")]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `acquire` polled until `lock-timeout-ms` elapsed without success.
    #[error("timed out after {timeout_ms}ms waiting for lock on '{path}'")]
    Timeout { path: PathBuf, timeout_ms: u64 },

    /// The existing lock is older than the stale threshold but breaking it
    /// was not enabled (or the break itself failed).
    #[error("stale lock on '{path}' (age {age_ms}ms exceeds threshold)")]
    Stale { path: PathBuf, age_ms: u64 },
}