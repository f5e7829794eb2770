//! Installed version records and the marker that makes them discoverable.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::constants::INSTALL_MARKER_FILE;
use crate::core::{IoResultExt, ManagedBinary, Result, UpdateError};
use crate::target::{TargetDescriptor, TargetHash};

/// Contents of `installed.json`.
///
/// Written only after the artifact passed its post-write hash check, so its
/// presence in a committed version directory means verification succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallMarker {
    /// Binary the artifact belongs to
    pub binary: ManagedBinary,
    /// Installed version
    pub version: Version,
    /// Target filename the artifact was fetched as
    pub target_filename: String,
    /// Verified content hash
    pub hash: TargetHash,
    /// Verified size in bytes
    pub size: u64,
    /// Digest of the executable unpacked from an archived target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable_hash: Option<TargetHash>,
    /// When the install was committed
    pub installed_at: DateTime<Utc>,
}

impl InstallMarker {
    /// Build the marker for a verified descriptor.
    pub fn new(binary: ManagedBinary, version: &Version, descriptor: &TargetDescriptor) -> Self {
        Self {
            binary,
            version: version.clone(),
            target_filename: descriptor.target_filename.clone(),
            hash: descriptor.hash.clone(),
            size: descriptor.size,
            executable_hash: None,
            installed_at: Utc::now(),
        }
    }

    /// Write the marker into `dir`, synced to disk.
    pub(crate) async fn write_to(&self, dir: &Path) -> Result<()> {
        let path = dir.join(INSTALL_MARKER_FILE);
        let json = serde_json::to_vec_pretty(self).map_err(|e| UpdateError::Config {
            message: format!("failed to serialize install marker: {e}"),
        })?;

        let mut file = fs::File::create(&path).await.io_context("creating marker", &path)?;
        file.write_all(&json).await.io_context("writing marker", &path)?;
        file.sync_all().await.io_context("syncing marker", &path)?;
        Ok(())
    }

    /// Read the marker from `dir`.
    ///
    /// A missing marker is `Ok(None)`. A marker that does not parse is logged
    /// and also treated as absent, because the directory cannot be trusted.
    pub(crate) async fn read_from(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(INSTALL_MARKER_FILE);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(UpdateError::io("reading marker", &path, e)),
        };

        match serde_json::from_slice(&bytes) {
            Ok(marker) => Ok(Some(marker)),
            Err(e) => {
                warn!("Ignoring unreadable install marker {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }
}

/// One verified, executable version of a managed binary on disk.
///
/// Records are never mutated after they are committed; they disappear only
/// when tidy removes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledVersionRecord {
    /// Binary the record belongs to
    pub binary: ManagedBinary,
    /// Installed version
    pub version: Version,
    /// Version directory holding artifact and marker
    pub directory: PathBuf,
    /// Executable artifact
    pub artifact_path: PathBuf,
    /// Verification marker
    pub marker: InstallMarker,
}

impl InstalledVersionRecord {
    /// Target filename this record was installed from.
    pub fn target_filename(&self) -> &str {
        &self.marker.target_filename
    }
}
