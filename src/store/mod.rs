//! Durable, crash-consistent storage of installed versions.
//!
//! The version store is the data layer underneath the librarian: it knows how
//! to commit, enumerate and delete installed versions, and nothing about which
//! versions *should* be installed.
//!
//! # Layout
//!
//! ```text
//! <root>/
//! ├── .locks/<binary>.lock              install lock files
//! └── <binary>/
//!     ├── .staging/install-XXXXXX/      install in progress, never listed
//!     ├── .staging/remove-<uuid>/       record being deleted, never listed
//!     ├── <version>/<exe>               committed artifact
//!     ├── <version>/installed.json      verification marker
//!     └── current                       Current Pointer
//! ```
//!
//! # Commit discipline
//!
//! An install is assembled in a private staging directory: the artifact is
//! written and synced, re-read and hashed, unpacked if it is an archive, made
//! executable, and only then is the marker written and the whole directory
//! renamed to `<version>`. The
//! rename is the commit point. Until it happens, [`VersionStore::list`] cannot
//! see the install; after it happens the record is complete. Removal is the
//! mirror image: the version directory is renamed into staging first, so the
//! record disappears atomically before any file is deleted.

mod archive;
mod record;

pub use archive::ArchiveFormat;
use archive::extract_executable;
pub use record::{InstallMarker, InstalledVersionRecord};

use std::path::{Path, PathBuf};

use semver::Version;
use tempfile::TempDir;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::constants::{
    CURRENT_POINTER_FILE, LOCKS_DIR, STAGED_ARCHIVE_FILE, STAGED_INSTALL_PREFIX, STAGED_REMOVAL_PREFIX,
    STAGING_DIR,
};
use crate::core::{IoResultExt, ManagedBinary, Result, UpdateError};
use crate::target::{TargetDescriptor, TargetHash};
use crate::utils::{atomic_write, set_executable, sync_dir};
use crate::verification::ChecksumVerifier;

/// Per-binary libraries of installed versions under one root directory.
#[derive(Debug, Clone)]
pub struct VersionStore {
    root: PathBuf,
}

impl VersionStore {
    /// Create a store rooted at `root`. Nothing is created on disk until the
    /// first install.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
        }
    }

    /// Root directory of all libraries.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding install lock files.
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join(LOCKS_DIR)
    }

    /// Library directory of one binary.
    pub fn library_dir(&self, binary: ManagedBinary) -> PathBuf {
        self.root.join(binary.name())
    }

    /// Directory a committed version lives in.
    pub fn version_dir(&self, binary: ManagedBinary, version: &Version) -> PathBuf {
        self.library_dir(binary).join(version.to_string())
    }

    /// Location of the Current Pointer file.
    pub fn pointer_path(&self, binary: ManagedBinary) -> PathBuf {
        self.library_dir(binary).join(CURRENT_POINTER_FILE)
    }

    fn staging_dir(&self, binary: ManagedBinary) -> PathBuf {
        self.library_dir(binary).join(STAGING_DIR)
    }

    /// Install `artifact` as `version` of `binary`.
    ///
    /// The bytes are checked against the descriptor before anything is
    /// written, written to staging, re-read and hashed again, and only then
    /// committed. Archived targets are unpacked in staging after that check,
    /// and the unpacked executable is re-read against its own digest. If a
    /// complete record for `version` already exists it is returned unchanged.
    ///
    /// # Errors
    ///
    /// - [`UpdateError::VerificationMismatch`] if the size or hash of the bytes,
    ///   or of a file read back from disk, disagrees with what was verified
    /// - [`UpdateError::Io`] on any filesystem failure
    /// - [`UpdateError::InvalidTarget`] if the descriptor is for another binary
    ///   or an archive does not hold the executable
    ///
    /// In every failure case the staging directory is discarded and no record
    /// becomes visible.
    pub async fn put(
        &self,
        binary: ManagedBinary,
        version: &Version,
        artifact: &[u8],
        descriptor: &TargetDescriptor,
    ) -> Result<InstalledVersionRecord> {
        if descriptor.binary != binary {
            return Err(UpdateError::InvalidTarget {
                target: descriptor.target_filename.clone(),
                reason: format!("descriptor is for {}, not {binary}", descriptor.binary),
            });
        }
        ChecksumVerifier::verify_bytes(descriptor, artifact)?;

        if let Some(existing) = self.get(binary, version).await? {
            debug!(%binary, %version, "Version already installed, keeping existing record");
            return Ok(existing);
        }

        let staged = self.stage(binary, artifact, descriptor).await?;
        let executable_hash = staged.unpack(descriptor).await?;

        let mut marker = InstallMarker::new(binary, version, descriptor);
        marker.executable_hash = executable_hash;
        self.commit(staged, version, marker).await
    }

    /// Write fetched bytes into a fresh staging directory.
    async fn stage(
        &self,
        binary: ManagedBinary,
        artifact: &[u8],
        descriptor: &TargetDescriptor,
    ) -> Result<StagedInstall> {
        let staging_dir = self.staging_dir(binary);
        fs::create_dir_all(&staging_dir).await.io_context("creating staging directory", &staging_dir)?;

        let dir = tempfile::Builder::new()
            .prefix(STAGED_INSTALL_PREFIX)
            .tempdir_in(&staging_dir)
            .io_context("creating staged install in", &staging_dir)?;

        let archive = ArchiveFormat::from_target(&descriptor.target_filename);
        let executable = dir.path().join(binary.executable_name());
        let download = match archive {
            Some(_) => dir.path().join(STAGED_ARCHIVE_FILE),
            None => executable.clone(),
        };
        write_synced(&download, artifact).await?;

        Ok(StagedInstall {
            dir,
            binary,
            archive,
            download,
            executable,
        })
    }

    /// Rename a verified staging directory into the library.
    async fn commit(
        &self,
        staged: StagedInstall,
        version: &Version,
        marker: InstallMarker,
    ) -> Result<InstalledVersionRecord> {
        let binary = staged.binary;
        marker.write_to(staged.dir.path()).await?;

        let final_dir = self.version_dir(binary, version);
        if fs::try_exists(&final_dir).await.io_context("checking", &final_dir)? {
            warn!(%binary, %version, "Replacing incomplete version directory {}", final_dir.display());
            self.discard(binary, &final_dir).await?;
        }

        fs::rename(staged.dir.path(), &final_dir).await.io_context("committing install to", &final_dir)?;
        let _ = staged.dir.keep();
        sync_dir(&self.library_dir(binary))?;

        info!(
            %binary, %version, target_filename = %marker.target_filename,
            "Committed new version to library"
        );

        Ok(InstalledVersionRecord {
            binary,
            version: version.clone(),
            artifact_path: final_dir.join(binary.executable_name()),
            directory: final_dir,
            marker,
        })
    }

    /// All committed records of `binary`, newest first.
    ///
    /// Re-reads the directory on every call. Staging entries, the pointer
    /// file, and version directories without a valid marker or artifact are
    /// skipped.
    pub async fn list(&self, binary: ManagedBinary) -> Result<Vec<InstalledVersionRecord>> {
        let library_dir = self.library_dir(binary);
        let mut entries = match fs::read_dir(&library_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(UpdateError::io("reading library", &library_dir, e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await.io_context("reading library", &library_dir)? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let Ok(version) = Version::parse(name) else {
                continue;
            };
            let is_dir = entry
                .file_type()
                .await
                .map(|file_type| file_type.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            if let Some(record) = self.read_record(binary, &version).await? {
                records.push(record);
            }
        }

        records.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(records)
    }

    /// The committed record for `version`, if any.
    pub async fn get(
        &self,
        binary: ManagedBinary,
        version: &Version,
    ) -> Result<Option<InstalledVersionRecord>> {
        self.read_record(binary, version).await
    }

    /// Delete `version` of `binary`.
    ///
    /// # Errors
    ///
    /// [`UpdateError::NotFound`] if the version directory does not exist;
    /// [`UpdateError::Io`] if it cannot be moved out of the library (for
    /// example because the artifact is in use on Windows).
    pub async fn remove(&self, binary: ManagedBinary, version: &Version) -> Result<()> {
        let dir = self.existing_version_dir(binary, version).await?;
        self.discard(binary, &dir).await?;
        info!(%binary, %version, "Removed version from library");
        Ok(())
    }

    /// Delete `version` unless the Current Pointer names it.
    ///
    /// The pointer is read before the version is moved out of the library and
    /// again afterwards. If an activation landed in between, the directory is
    /// moved back and nothing is deleted. Returns whether the version was
    /// removed.
    pub async fn remove_unless_current(
        &self,
        binary: ManagedBinary,
        version: &Version,
    ) -> Result<bool> {
        let dir = self.existing_version_dir(binary, version).await?;
        if self.read_current(binary).await?.as_ref() == Some(version) {
            return Ok(false);
        }

        let trash = self.move_to_trash(binary, &dir).await?;
        if self.read_current(binary).await?.as_ref() == Some(version) {
            warn!(%binary, %version, "Version was activated while being removed, restoring it");
            fs::rename(&trash, &dir).await.io_context("restoring", &dir)?;
            sync_dir(&self.library_dir(binary))?;
            return Ok(false);
        }

        delete_trash(&trash).await;
        info!(%binary, %version, "Removed version from library");
        Ok(true)
    }

    /// Remove leftover staging entries, returning how many were deleted.
    ///
    /// Removal debris is always safe to delete. Install debris must only be
    /// swept while the binary's install lock is held, otherwise an in-flight
    /// install could lose its staging directory.
    pub async fn sweep_staging(&self, binary: ManagedBinary, include_installs: bool) -> usize {
        let staging_dir = self.staging_dir(binary);
        let Ok(mut entries) = fs::read_dir(&staging_dir).await else {
            return 0;
        };

        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let sweep = name.starts_with(STAGED_REMOVAL_PREFIX)
                || (include_installs && name.starts_with(STAGED_INSTALL_PREFIX));
            if !sweep {
                continue;
            }
            match fs::remove_dir_all(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => debug!("Could not sweep {}: {}", entry.path().display(), e),
            }
        }
        if removed > 0 {
            debug!(%binary, removed, "Swept staging debris");
        }
        removed
    }

    /// Version the Current Pointer names, if it is set and readable.
    pub async fn read_current(&self, binary: ManagedBinary) -> Result<Option<Version>> {
        let path = self.pointer_path(binary);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(UpdateError::io("reading current pointer", &path, e)),
        };

        match Version::parse(content.trim()) {
            Ok(version) => Ok(Some(version)),
            Err(e) => {
                warn!(%binary, "Ignoring malformed current pointer {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    /// Atomically point `binary` at `version`.
    pub(crate) fn write_current(&self, binary: ManagedBinary, version: &Version) -> Result<()> {
        atomic_write(&self.pointer_path(binary), format!("{version}\n").as_bytes())
    }

    /// Put the pointer back to `previous`, or unset it.
    pub(crate) async fn restore_current(
        &self,
        binary: ManagedBinary,
        previous: Option<&Version>,
    ) -> Result<()> {
        if let Some(previous) = previous {
            return self.write_current(binary, previous);
        }
        let path = self.pointer_path(binary);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(UpdateError::io("removing current pointer", &path, e)),
        }
    }

    async fn read_record(
        &self,
        binary: ManagedBinary,
        version: &Version,
    ) -> Result<Option<InstalledVersionRecord>> {
        let directory = self.version_dir(binary, version);
        let Some(marker) = InstallMarker::read_from(&directory).await? else {
            return Ok(None);
        };
        if marker.binary != binary || &marker.version != version {
            warn!(
                %binary, %version,
                "Marker in {} describes {} {}, ignoring",
                directory.display(), marker.binary, marker.version
            );
            return Ok(None);
        }

        let artifact_path = directory.join(binary.executable_name());
        let is_file = fs::metadata(&artifact_path)
            .await
            .map(|metadata| metadata.is_file())
            .unwrap_or(false);
        if !is_file {
            warn!(%binary, %version, "Marker present but artifact missing at {}", artifact_path.display());
            return Ok(None);
        }

        Ok(Some(InstalledVersionRecord {
            binary,
            version: version.clone(),
            directory,
            artifact_path,
            marker,
        }))
    }

    async fn existing_version_dir(&self, binary: ManagedBinary, version: &Version) -> Result<PathBuf> {
        let dir = self.version_dir(binary, version);
        if !fs::try_exists(&dir).await.io_context("checking", &dir)? {
            return Err(UpdateError::NotFound {
                binary,
                version: version.to_string(),
            });
        }
        Ok(dir)
    }

    /// Move `dir` out of the library, then delete it.
    async fn discard(&self, binary: ManagedBinary, dir: &Path) -> Result<()> {
        let trash = self.move_to_trash(binary, dir).await?;
        delete_trash(&trash).await;
        Ok(())
    }

    async fn move_to_trash(&self, binary: ManagedBinary, dir: &Path) -> Result<PathBuf> {
        let staging_dir = self.staging_dir(binary);
        fs::create_dir_all(&staging_dir).await.io_context("creating staging directory", &staging_dir)?;

        let trash = staging_dir.join(format!("{STAGED_REMOVAL_PREFIX}{}", uuid::Uuid::new_v4()));
        fs::rename(dir, &trash).await.io_context("moving out of library", dir)?;
        sync_dir(&self.library_dir(binary))?;
        Ok(trash)
    }
}

/// An install assembled under `.staging`. Dropping it deletes the directory.
struct StagedInstall {
    dir: TempDir,
    binary: ManagedBinary,
    archive: Option<ArchiveFormat>,
    /// Fetched bytes as written
    download: PathBuf,
    /// Executable the committed record will point at
    executable: PathBuf,
}

impl StagedInstall {
    /// Re-hash the written download and produce the executable.
    ///
    /// Returns the digest of an executable unpacked from an archive, or `None`
    /// when the download is the executable itself.
    async fn unpack(&self, descriptor: &TargetDescriptor) -> Result<Option<TargetHash>> {
        ChecksumVerifier::verify_file(descriptor, &self.download).await?;

        let Some(format) = self.archive else {
            set_executable(&self.executable).await?;
            return Ok(None);
        };

        let bytes =
            extract_executable(format, self.download.clone(), self.binary, &descriptor.target_filename)
                .await?;
        let expected = ChecksumVerifier::digest_bytes(descriptor.hash.algorithm(), &bytes);

        write_synced(&self.executable, &bytes).await?;
        set_executable(&self.executable).await?;
        ChecksumVerifier::verify_file_hash(
            self.binary,
            &descriptor.target_filename,
            &expected,
            &self.executable,
        )
        .await?;

        fs::remove_file(&self.download).await.io_context("removing unpacked archive", &self.download)?;
        debug!(binary = %self.binary, executable_hash = %expected, "Unpacked executable from archive");
        Ok(Some(expected))
    }
}

async fn delete_trash(trash: &Path) {
    if let Err(e) = fs::remove_dir_all(trash).await {
        warn!("Failed to delete {} (will retry on next tidy): {}", trash.display(), e);
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path).await.io_context("creating artifact", path)?;
    file.write_all(bytes).await.io_context("writing artifact", path)?;
    file.sync_all().await.io_context("syncing artifact", path)?;
    Ok(())
}
