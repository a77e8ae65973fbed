//! Per-device advisory locking.
//!
//! Mutating commands hold `<locks_dir>/<device-id>.lock` for their whole
//! run, so two devfence invocations never interleave on one device. External
//! editors of the rule files are not covered.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Exclusive lock on one device. Released on drop.
pub struct LockGuard {
    _file: File,
    path: PathBuf,
}

impl LockGuard {
    /// Try to lock `device_id` without blocking.
    ///
    /// The file is opened with create+read+write and never truncated, so
    /// there is no window between creation and locking.
    pub fn acquire(locks_dir: &Path, device_id: &str) -> Result<Self> {
        fs::create_dir_all(locks_dir)
            .with_context(|| format!("Failed to create lock directory: {:?}", locks_dir))?;

        let path = locks_dir.join(format!("{}.lock", device_id));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open lock file: {:?}", path))?;

        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
            .context("Failed to set lock file permissions")?;

        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "another devfence invocation is running for device '{}'.\n\
                 Wait for it to complete, or remove {:?} if none is running.",
                device_id,
                path
            )
        })?;

        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_acquire_release() {
        let temp_dir = TempDir::new().unwrap();
        let guard = LockGuard::acquire(temp_dir.path(), "tv").unwrap();
        assert_eq!(guard.path(), temp_dir.path().join("tv.lock"));
        drop(guard);
        assert!(LockGuard::acquire(temp_dir.path(), "tv").is_ok());
    }

    #[test]
    fn test_second_lock_on_same_device_fails() {
        let temp_dir = TempDir::new().unwrap();
        let _guard = LockGuard::acquire(temp_dir.path(), "tv").unwrap();
        let err = LockGuard::acquire(temp_dir.path(), "tv").err().unwrap();
        assert!(err.to_string().contains("another devfence invocation"));
    }

    #[test]
    fn test_devices_lock_independently() {
        let temp_dir = TempDir::new().unwrap();
        let _tv = LockGuard::acquire(temp_dir.path(), "tv").unwrap();
        assert!(LockGuard::acquire(temp_dir.path(), "laptop").is_ok());
    }

    #[test]
    fn test_creates_lock_dir() {
        let temp_dir = TempDir::new().unwrap();
        let locks = temp_dir.path().join("locks");
        let _guard = LockGuard::acquire(&locks, "tv").unwrap();
        assert!(locks.is_dir());
    }
}
