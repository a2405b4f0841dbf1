//! File-based locking so scheduled updates never overlap.
//!
//! Manual add/remove commands do not take the lock: single-element
//! mutations commute with a running update.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Exclusive lock on the update lock file, released on drop.
pub struct LockGuard {
    _file: File,
}

impl LockGuard {
    /// Acquire the lock without blocking.
    /// Fails if another update is already running.
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let lock_path = path.as_ref();
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create lock directory: {:?}", parent))?;
        }

        // create+read+write without truncate: no window between creation and locking
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)
            .with_context(|| format!("Failed to open lock file: {:?}", lock_path))?;

        fs::set_permissions(lock_path, fs::Permissions::from_mode(0o600))
            .context("Failed to set lock file permissions")?;

        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "Another blocksync update is already running.\n\
                 If you believe this is an error, remove the lock file: {:?}",
                lock_path
            )
        })?;

        Ok(Self { _file: file })
    }
}
