//! Per-binary install locks.
//!
//! Installs for one managed binary are serialized by two layers:
//!
//! 1. an in-process [`tokio::sync::Mutex`], one per [`ManagedBinary`], so that
//!    concurrent triggers inside the agent queue up without touching the disk;
//! 2. an exclusive OS file lock on `<root>/.locks/<binary>.lock`, so that a
//!    second agent process pointed at the same library cannot interleave an
//!    install with ours.
//!
//! Different binaries use different mutexes and different lock files, so an
//! agent install never waits on a collector install.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::core::{IoResultExt, ManagedBinary, Result, UpdateError};

/// Exclusive OS-level lock on one binary's lock file.
pub struct BinaryFileLock {
    file: File,
    path: PathBuf,
}

impl BinaryFileLock {
    /// Acquire the lock file for `binary` in `locks_dir`, waiting as long as
    /// another process holds it.
    ///
    /// The blocking wait runs on the blocking thread pool so the runtime keeps
    /// serving other binaries meanwhile.
    pub async fn acquire(locks_dir: &Path, binary: ManagedBinary) -> Result<Self> {
        tokio::fs::create_dir_all(locks_dir).await.io_context("creating locks directory", locks_dir)?;

        let path = locks_dir.join(format!("{}.lock", binary.name()));
        let lock_path = path.clone();

        let file = tokio::task::spawn_blocking(move || -> Result<File> {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&lock_path)
                .io_context("opening lock file", &lock_path)?;
            file.lock_exclusive().io_context("locking", &lock_path)?;
            Ok(file)
        })
        .await
        .map_err(|e| UpdateError::io("waiting for lock", &path, std::io::Error::other(e)))??;

        debug!(%binary, "Acquired install lock file {}", path.display());
        Ok(Self {
            file,
            path,
        })
    }
}

impl Drop for BinaryFileLock {
    fn drop(&mut self) {
        #[allow(unstable_name_collisions)]
        if let Err(e) = self.file.unlock() {
            warn!("Failed to unlock {}: {}", self.path.display(), e);
        }
    }
}

/// Held for the duration of one install; releases both layers on drop.
pub struct InstallGuard<'a> {
    _file: BinaryFileLock,
    _guard: MutexGuard<'a, ()>,
}

/// One install lock per managed binary.
pub struct InstallLocks {
    locks_dir: PathBuf,
    mutexes: [Mutex<()>; ManagedBinary::ALL.len()],
}

impl InstallLocks {
    /// Locks whose files live in `locks_dir`.
    pub fn new(locks_dir: impl Into<PathBuf>) -> Self {
        Self {
            locks_dir: locks_dir.into(),
            mutexes: std::array::from_fn(|_| Mutex::new(())),
        }
    }

    /// Wait for exclusive install rights on `binary`.
    pub async fn acquire(&self, binary: ManagedBinary) -> Result<InstallGuard<'_>> {
        let guard = self.mutex(binary).lock().await;
        let file = BinaryFileLock::acquire(&self.locks_dir, binary).await?;
        Ok(InstallGuard {
            _file: file,
            _guard: guard,
        })
    }

    /// Whether an install for `binary` is currently in flight in this process.
    pub fn is_installing(&self, binary: ManagedBinary) -> bool {
        self.mutex(binary).try_lock().is_err()
    }

    fn mutex(&self, binary: ManagedBinary) -> &Mutex<()> {
        let index = ManagedBinary::ALL
            .iter()
            .position(|candidate| *candidate == binary)
            .unwrap_or_default();
        &self.mutexes[index]
    }
}
