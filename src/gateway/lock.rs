//! Startup advisory lock, so only one gateway instance runs per data
//! directory at a time (§4.4's "Startup lock").

use std::fs::{File, OpenOptions};
use std::path::Path;

use fs2::FileExt;

use crate::error::InitError;

/// A held advisory lock. Released automatically when dropped.
pub struct LockGuard {
    file: File,
}

impl LockGuard {
    /// Acquire an exclusive, non-blocking advisory lock on `path`, creating
    /// the file if it does not already exist.
    ///
    /// # Errors
    /// Returns [`InitError::LockHeld`] if another instance already holds the
    /// lock, and [`InitError::ConfigMissing`] if the lock file cannot be
    /// opened or the lock cannot be acquired for any other reason.
    pub fn acquire(path: &Path) -> Result<Self, InitError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .map_err(|err| InitError::ConfigMissing(format!("cannot open lock file: {err}")))?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file }),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Err(InitError::LockHeld),
            Err(err) => Err(InitError::ConfigMissing(format!("lock acquisition failed: {err}"))),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_on_the_same_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gateway.lock");
        let first = LockGuard::acquire(&path).expect("first lock should succeed");
        let second = LockGuard::acquire(&path);
        assert!(matches!(second, Err(InitError::LockHeld)));
        drop(first);
        assert!(LockGuard::acquire(&path).is_ok());
    }
}
