//! Current-version selection and switch-over.
//!
//! The selector decides which installed record a newly spawned process should
//! execute and owns the Current Pointer that records that decision. The
//! pointer is a small file replaced by rename, so a concurrent reader sees
//! either the previous target or the new one in full.
//!
//! Pointer lifecycle per binary:
//!
//! ```text
//! Unset ──activate(V1)──> Pointing(V1) ──activate(V2)──> Pointing(V2) ──> ...
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::core::{ManagedBinary, Result, UpdateError};
use crate::pin::PinRegistry;
use crate::store::{InstalledVersionRecord, VersionStore};

/// Resolves and switches the current version of each managed binary.
#[derive(Debug, Clone)]
pub struct CurrentSelector {
    store: VersionStore,
    pins: Arc<PinRegistry>,
}

impl CurrentSelector {
    /// A selector over `store`, honoring `pins`.
    pub fn new(store: VersionStore, pins: Arc<PinRegistry>) -> Self {
        Self {
            store,
            pins,
        }
    }

    /// The record that should be executing now.
    ///
    /// The pinned version wins when it is installed; otherwise the newest
    /// installed version is chosen.
    ///
    /// # Errors
    ///
    /// [`UpdateError::NoRunnableVersion`] when the library is empty. Callers
    /// must treat this as a failed update attempt and keep running whatever
    /// binary is already running.
    pub async fn select(&self, binary: ManagedBinary) -> Result<InstalledVersionRecord> {
        let records = self.store.list(binary).await?;

        if let Some(pinned) = self.pins.get(binary) {
            if let Some(record) = records.iter().find(|record| record.version == pinned) {
                return Ok(record.clone());
            }
            warn!(%binary, %pinned, "Pinned version is not installed, selecting newest");
        }

        records.into_iter().next().ok_or(UpdateError::NoRunnableVersion {
            binary,
        })
    }

    /// Point `binary` at `record`.
    ///
    /// Performs no verification (the librarian did that at install time) and
    /// no restart. Refuses a record that is no longer in the library, so the
    /// pointer is never moved onto a missing version. The record is checked
    /// again after the pointer is written, and the previous pointer is put
    /// back if the record vanished in between.
    pub async fn activate(&self, binary: ManagedBinary, record: &InstalledVersionRecord) -> Result<()> {
        if record.binary != binary {
            return Err(UpdateError::InvalidTarget {
                target: record.target_filename().to_string(),
                reason: format!("record belongs to {}, not {binary}", record.binary),
            });
        }
        if self.store.get(binary, &record.version).await?.is_none() {
            return Err(UpdateError::NotFound {
                binary,
                version: record.version.to_string(),
            });
        }

        let previous = self.store.read_current(binary).await?;
        self.store.write_current(binary, &record.version)?;

        // Tidy may have removed the record between the check and the write
        if self.store.get(binary, &record.version).await?.is_none() {
            warn!(%binary, version = %record.version, "Version removed during activation, restoring pointer");
            self.store.restore_current(binary, previous.as_ref()).await?;
            return Err(UpdateError::NotFound {
                binary,
                version: record.version.to_string(),
            });
        }

        match previous {
            Some(previous) if previous == record.version => {}
            Some(previous) => {
                info!(%binary, from = %previous, to = %record.version, "Activated new version")
            }
            None => info!(%binary, version = %record.version, "Activated first version"),
        }
        Ok(())
    }

    /// The record the Current Pointer names, if set and still installed.
    pub async fn current(&self, binary: ManagedBinary) -> Result<Option<InstalledVersionRecord>> {
        let Some(version) = self.store.read_current(binary).await? else {
            return Ok(None);
        };
        let record = self.store.get(binary, &version).await?;
        if record.is_none() {
            warn!(%binary, %version, "Current pointer names a version that is not installed");
        }
        Ok(record)
    }

    /// Executable a supervisor should launch for `binary`.
    pub async fn current_executable(&self, binary: ManagedBinary) -> Result<Option<PathBuf>> {
        Ok(self.current(binary).await?.map(|record| record.artifact_path))
    }
}
