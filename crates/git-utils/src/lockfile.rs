use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::{LockError, UtilError};
use crate::Result;

/// Parameters for `LockFile::acquire_with_options`, matching the core's
/// configured lock-acquisition knobs (`lock-timeout-ms`,
/// `lock-retry-interval-ms`, `stale-lock-threshold-ms`, `break-stale`).
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// How long to poll for the lock before giving up. 0 fails immediately
    /// on contention, matching `RefLockError`'s "immediate contention" case.
    pub timeout_ms: u64,
    /// Delay between acquisition attempts while polling.
    pub retry_interval_ms: u64,
    /// Age beyond which an existing lock is considered breakable. `None`
    /// disables stale-lock detection entirely.
    pub stale_threshold_ms: Option<u64>,
    /// Whether to actually remove a stale lock and retry, or just report it.
    pub break_stale: bool,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 0,
            retry_interval_ms: 100,
            stale_threshold_ms: None,
            break_stale: false,
        }
    }
}

/// RAII lock file guard. Creates a `.lock` file on construction,
/// atomically renames on commit, removes on drop if not committed.
///
/// This matches C git's lock file protocol:
/// - Create `<path>.lock` with O_CREAT|O_EXCL
/// - Write new contents to the lock file
/// - Atomically rename `.lock` to target on commit
/// - Remove `.lock` on drop if not committed (rollback)
pub struct LockFile {
    /// The target file path (without .lock suffix).
    path: PathBuf,
    /// The lock file path (with .lock suffix).
    lock_path: PathBuf,
    /// The open file handle for writing.
    file: Option<File>,
    /// Whether commit() has been called.
    committed: bool,
}

const LOCK_SUFFIX: &str = ".lock";

impl LockFile {
    /// Acquire a lock on the given path. Creates `path.lock` using O_CREAT|O_EXCL.
    ///
    /// Returns an error if the lock file already exists (another process holds the lock)
    /// or if the file cannot be created.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock_path = PathBuf::from(format!("{}{}", path.display(), LOCK_SUFFIX));

        let file = OpenOptions::new()
            .write(true)
            .create_new(true) // O_CREAT|O_EXCL equivalent
            .open(&lock_path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    UtilError::Lock(LockError::AlreadyLocked {
                        path: lock_path.clone(),
                    })
                } else {
                    UtilError::Lock(LockError::Create {
                        path: lock_path.clone(),
                        source: e,
                    })
                }
            })?;

        Ok(Self {
            path,
            lock_path,
            file: Some(file),
            committed: false,
        })
    }

    /// Try to acquire without blocking. Returns Ok(None) if already locked,
    /// Ok(Some(lockfile)) on success, or Err on other failures.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>> {
        match Self::acquire(path) {
            Ok(lk) => Ok(Some(lk)),
            Err(UtilError::Lock(LockError::AlreadyLocked { .. })) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Acquire a lock, polling and optionally breaking a stale lock per `opts`.
    ///
    /// With default options this behaves exactly like [`LockFile::acquire`]
    /// (fail immediately on contention). Setting `timeout_ms` makes it retry
    /// every `retry_interval_ms` until the timeout elapses; setting
    /// `stale_threshold_ms` lets it remove an abandoned lock file older than
    /// the threshold (only when `break_stale` is true) and retry once.
    pub fn acquire_with_options(path: impl AsRef<Path>, opts: &LockOptions) -> Result<Self> {
        let path = path.as_ref();
        let deadline = SystemTime::now() + Duration::from_millis(opts.timeout_ms);

        loop {
            match Self::acquire(path) {
                Ok(lk) => return Ok(lk),
                Err(UtilError::Lock(LockError::AlreadyLocked { path: lock_path })) => {
                    if let Some(threshold_ms) = opts.stale_threshold_ms {
                        if let Ok(age) = Self::lock_age(&lock_path) {
                            if age >= Duration::from_millis(threshold_ms) {
                                if opts.break_stale {
                                    Self::break_lock(&lock_path)?;
                                    continue;
                                }
                                return Err(UtilError::Lock(LockError::Stale {
                                    path: lock_path,
                                    age_ms: age.as_millis() as u64,
                                }));
                            }
                        }
                    }

                    if SystemTime::now() >= deadline {
                        return Err(UtilError::Lock(LockError::Timeout {
                            path: lock_path,
                            timeout_ms: opts.timeout_ms,
                        }));
                    }

                    std::thread::sleep(Duration::from_millis(opts.retry_interval_ms));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Age of an existing lock file, derived from its mtime.
    pub fn lock_age(lock_path: impl AsRef<Path>) -> Result<Duration> {
        let metadata = fs::metadata(lock_path.as_ref())?;
        let modified = metadata.modified()?;
        Ok(SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default())
    }

    /// Forcibly remove a lock file left behind by a dead or hung process.
    pub fn break_lock(lock_path: impl AsRef<Path>) -> Result<()> {
        match fs::remove_file(lock_path.as_ref()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(UtilError::Io(e)),
        }
    }

    /// Get a mutable reference to the underlying file for writing.
    pub fn file_mut(&mut self) -> Option<&mut File> {
        self.file.as_mut()
    }

    /// Get the path of the target file (without .lock).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the path of the lock file (with .lock).
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Commit: close the file and atomically rename .lock to target.
    pub fn commit(mut self) -> Result<()> {
        // Flush and sync the file
        if let Some(ref mut file) = self.file {
            file.flush().map_err(|e| {
                UtilError::Lock(LockError::Commit {
                    path: self.lock_path.clone(),
                    source: e,
                })
            })?;
            file.sync_all().map_err(|e| {
                UtilError::Lock(LockError::Commit {
                    path: self.lock_path.clone(),
                    source: e,
                })
            })?;
        }
        // Drop the file handle before rename
        self.file.take();

        // Atomic rename
        fs::rename(&self.lock_path, &self.path).map_err(|e| {
            UtilError::Lock(LockError::Commit {
                path: self.lock_path.clone(),
                source: e,
            })
        })?;

        self.committed = true;
        Ok(())
    }

    /// Rollback: remove .lock file (also happens on Drop).
    pub fn rollback(mut self) -> Result<()> {
        self.file.take();
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path)?;
        }
        self.committed = true; // Prevent Drop from trying to clean up again
        Ok(())
    }
}

impl Write for LockFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("lock file already closed"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("lock file already closed"))?
            .flush()
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if !self.committed {
            self.file.take();
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn acquire_and_commit() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("test.txt");

        // Write initial content
        fs::write(&target, b"old content").unwrap();

        // Acquire lock
        let mut lock = LockFile::acquire(&target).unwrap();
        assert!(lock.lock_path().exists());

        // Write new content
        lock.write_all(b"new content").unwrap();

        // Commit
        lock.commit().unwrap();

        // Verify
        assert!(!dir.path().join("test.txt.lock").exists());
        let content = fs::read_to_string(&target).unwrap();
        assert_eq!(content, "new content");
    }

    #[test]
    fn acquire_and_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("test.txt");
        fs::write(&target, b"original").unwrap();

        {
            let mut lock = LockFile::acquire(&target).unwrap();
            lock.write_all(b"should not persist").unwrap();
            lock.rollback().unwrap();
        }

        // Original content should be unchanged
        let content = fs::read_to_string(&target).unwrap();
        assert_eq!(content, "original");
        assert!(!dir.path().join("test.txt.lock").exists());
    }

    #[test]
    fn drop_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("test.txt");
        fs::write(&target, b"original").unwrap();

        {
            let mut lock = LockFile::acquire(&target).unwrap();
            lock.write_all(b"dropped content").unwrap();
            // Drop without commit
        }

        // Lock file should be cleaned up
        assert!(!dir.path().join("test.txt.lock").exists());
        // Original should be unchanged
        let content = fs::read_to_string(&target).unwrap();
        assert_eq!(content, "original");
    }

    #[test]
    fn double_lock_fails() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("test.txt");
        fs::write(&target, b"content").unwrap();

        let _lock1 = LockFile::acquire(&target).unwrap();

        // Second lock should fail
        match LockFile::acquire(&target) {
            Err(UtilError::Lock(LockError::AlreadyLocked { .. })) => {}
            Err(e) => panic!("expected AlreadyLocked, got error: {}", e),
            Ok(_) => panic!("expected AlreadyLocked, got Ok"),
        }
    }

    #[test]
    fn try_acquire_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("test.txt");
        fs::write(&target, b"content").unwrap();

        let _lock1 = LockFile::acquire(&target).unwrap();

        // try_acquire should return None
        let result = LockFile::try_acquire(&target).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn lock_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("new_file.txt");

        let mut lock = LockFile::acquire(&target).unwrap();
        lock.write_all(b"created via lock").unwrap();
        lock.commit().unwrap();

        let content = fs::read_to_string(&target).unwrap();
        assert_eq!(content, "created via lock");
    }

    #[test]
    fn acquire_with_options_default_fails_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("test.txt");
        fs::write(&target, b"content").unwrap();

        let _held = LockFile::acquire(&target).unwrap();

        let result = LockFile::acquire_with_options(&target, &LockOptions::default());
        match result {
            Err(UtilError::Lock(LockError::AlreadyLocked { .. })) => {}
            other => panic!("expected AlreadyLocked, got {:?}", other.err()),
        }
    }

    #[test]
    fn acquire_with_options_retries_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("test.txt");
        fs::write(&target, b"content").unwrap();

        let held = LockFile::acquire(&target).unwrap();
        let lock_path = held.lock_path().to_path_buf();

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            drop(held);
        });

        let opts = LockOptions {
            timeout_ms: 2000,
            retry_interval_ms: 10,
            ..LockOptions::default()
        };
        let lock = LockFile::acquire_with_options(&target, &opts).unwrap();
        assert_eq!(lock.lock_path(), lock_path.as_path());
    }

    #[test]
    fn acquire_with_options_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("test.txt");
        fs::write(&target, b"content").unwrap();

        let _held = LockFile::acquire(&target).unwrap();

        let opts = LockOptions {
            timeout_ms: 50,
            retry_interval_ms: 10,
            ..LockOptions::default()
        };
        match LockFile::acquire_with_options(&target, &opts) {
            Err(UtilError::Lock(LockError::Timeout { .. })) => {}
            other => panic!("expected Timeout, got {:?}", other.err()),
        }
    }

    #[test]
    fn acquire_with_options_breaks_stale_lock() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("test.txt");
        fs::write(&target, b"content").unwrap();

        // Simulate an abandoned lock: create it directly, bypassing the
        // guard so nothing removes it when this scope ends.
        let lock_path = dir.path().join("test.txt.lock");
        fs::write(&lock_path, b"").unwrap();

        let opts = LockOptions {
            timeout_ms: 1000,
            retry_interval_ms: 10,
            stale_threshold_ms: Some(0),
            break_stale: true,
        };
        let mut lock = LockFile::acquire_with_options(&target, &opts).unwrap();
        lock.write_all(b"fresh content").unwrap();
        lock.commit().unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "fresh content");
    }

    #[test]
    fn acquire_with_options_reports_stale_without_breaking() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("test.txt");
        fs::write(&target, b"content").unwrap();

        let lock_path = dir.path().join("test.txt.lock");
        fs::write(&lock_path, b"").unwrap();

        let opts = LockOptions {
            timeout_ms: 0,
            retry_interval_ms: 10,
            stale_threshold_ms: Some(0),
            break_stale: false,
        };
        match LockFile::acquire_with_options(&target, &opts) {
            Err(UtilError::Lock(LockError::Stale { .. })) => {}
            other => panic!("expected Stale, got {:?}", other.err()),
        }
    }
}
