//! The librarian: what enters and leaves each binary's library.
//!
//! [`LibraryManager`] is the only writer of the version store. It installs
//! verified targets behind a per-binary install lock and prunes old versions
//! with a retention policy that never removes the running, pinned or activated
//! version and never empties a library.
//!
//! # Install flow
//!
//! ```text
//! add_to_library(binary, current, target, descriptor)
//!   ├── available?  ── yes ──> Ok(())              (no lock, no fetch)
//!   ├── acquire install lock for `binary`
//!   ├── available?  ── yes ──> Ok(())              (a concurrent caller won)
//!   ├── fetch bytes before the deadline            (FetchError on expiry)
//!   └── VersionStore::put                          (verify, stage, commit)
//! ```
//!
//! The second availability check is what keeps concurrent callers for the
//! same target down to a single fetch.

mod lock;
mod retention;

pub use lock::{BinaryFileLock, InstallGuard, InstallLocks};
pub use retention::{RetentionPlan, plan_retention};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use semver::Version;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::constants::{DEFAULT_FETCH_TIMEOUT, DEFAULT_VERSIONS_TO_KEEP};
use crate::core::{FetchError, ManagedBinary, Result, UpdateError};
use crate::fetch::ArtifactFetcher;
use crate::pin::PinRegistry;
use crate::store::{InstalledVersionRecord, VersionStore};
use crate::target::{TargetDescriptor, version_from_target};

/// The three operations the updater loop needs from a library.
///
/// [`LibraryManager`] is the production implementation; tests substitute
/// their own doubles.
pub trait Librarian: Send + Sync {
    /// Whether the release named by `target_filename` is already installed.
    ///
    /// Never blocks on an in-flight install. Unparseable filenames are
    /// reported as unavailable.
    fn available(
        &self,
        binary: ManagedBinary,
        target_filename: &str,
    ) -> impl Future<Output = bool> + Send;

    /// Download, verify and install `target_filename` unless already present.
    ///
    /// `current_version` is informational only.
    fn add_to_library(
        &self,
        binary: ManagedBinary,
        current_version: &str,
        target_filename: &str,
        descriptor: &TargetDescriptor,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Prune old versions. Best effort; failures are logged, not returned.
    fn tidy_library(
        &self,
        binary: ManagedBinary,
        current_version: &str,
    ) -> impl Future<Output = ()> + Send;
}

/// Filesystem-backed [`Librarian`].
pub struct LibraryManager<F> {
    store: VersionStore,
    fetcher: F,
    locks: InstallLocks,
    pins: Arc<PinRegistry>,
    versions_to_keep: usize,
    fetch_timeout: Duration,
}

impl<F: ArtifactFetcher> LibraryManager<F> {
    /// A librarian over `store` that downloads with `fetcher`.
    pub fn new(store: VersionStore, fetcher: F, pins: Arc<PinRegistry>) -> Self {
        let locks = InstallLocks::new(store.locks_dir());
        Self {
            store,
            fetcher,
            locks,
            pins,
            versions_to_keep: DEFAULT_VERSIONS_TO_KEEP,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Number of recent versions tidy keeps besides protected ones (min 1).
    pub fn with_versions_to_keep(mut self, versions_to_keep: usize) -> Self {
        self.versions_to_keep = versions_to_keep.max(1);
        self
    }

    /// Deadline applied by [`Librarian::add_to_library`].
    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// The underlying version store.
    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    /// The injected fetch capability.
    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Whether an install for `binary` is in flight in this process.
    pub fn is_installing(&self, binary: ManagedBinary) -> bool {
        self.locks.is_installing(binary)
    }

    /// The installed record for the release named by `target_filename`.
    pub async fn installed_record(
        &self,
        binary: ManagedBinary,
        target_filename: &str,
    ) -> Result<Option<InstalledVersionRecord>> {
        let version = version_from_target(binary, target_filename)?;
        self.store.get(binary, &version).await
    }

    /// [`Librarian::add_to_library`] with an explicit deadline.
    ///
    /// The deadline covers waiting for the install lock and the fetch. Once
    /// the bytes are in hand the verify-stage-commit sequence runs to
    /// completion regardless of the deadline.
    ///
    /// # Errors
    ///
    /// - [`UpdateError::InvalidTarget`] if the descriptor does not describe
    ///   `target_filename` of `binary`, or the filename carries no version
    /// - [`UpdateError::Fetch`] on fetch failure or deadline expiry
    /// - [`UpdateError::VerificationMismatch`] if the bytes do not match
    /// - [`UpdateError::Io`] on local filesystem failure
    ///
    /// On every error the library is exactly as it was before the call.
    pub async fn add_to_library_with_deadline(
        &self,
        binary: ManagedBinary,
        current_version: &str,
        target_filename: &str,
        descriptor: &TargetDescriptor,
        deadline: Instant,
    ) -> Result<()> {
        let version = self.validate_target(binary, target_filename, descriptor)?;

        if self.available(binary, target_filename).await {
            debug!(%binary, target_filename, "Target already in library");
            return Ok(());
        }

        let budget = deadline.saturating_duration_since(Instant::now());
        let _guard = tokio::time::timeout_at(deadline, self.locks.acquire(binary))
            .await
            .map_err(|_| FetchError::TimedOut(budget))??;

        if self.available(binary, target_filename).await {
            debug!(%binary, target_filename, "Target installed by a concurrent caller");
            return Ok(());
        }
        self.store.sweep_staging(binary, true).await;

        info!(%binary, current_version, %version, target_filename, "Installing new version");

        let bytes = match tokio::time::timeout_at(deadline, self.fetcher.fetch(target_filename)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                warn!(%binary, target_filename, "Fetch failed: {e}");
                return Err(e.into());
            }
            Err(_) => {
                warn!(%binary, target_filename, "Fetch did not finish within {budget:?}");
                return Err(FetchError::TimedOut(budget).into());
            }
        };

        match self.store.put(binary, &version, &bytes, descriptor).await {
            Ok(record) => {
                info!(
                    %binary,
                    %version,
                    path = %record.artifact_path.display(),
                    "Added version to library"
                );
                Ok(())
            }
            Err(e) => {
                if e.is_security_relevant() {
                    error!(
                        target: "autoupdate::security",
                        %binary,
                        target_filename,
                        "Downloaded artifact failed verification: {e}"
                    );
                }
                Err(e)
            }
        }
    }

    fn validate_target(
        &self,
        binary: ManagedBinary,
        target_filename: &str,
        descriptor: &TargetDescriptor,
    ) -> Result<Version> {
        if descriptor.binary != binary || descriptor.target_filename != target_filename {
            return Err(UpdateError::InvalidTarget {
                target: target_filename.to_string(),
                reason: format!(
                    "descriptor describes {} '{}'",
                    descriptor.binary, descriptor.target_filename
                ),
            });
        }
        version_from_target(binary, target_filename)
    }

    /// Versions tidy must keep regardless of age, or `None` if the set cannot
    /// be determined safely.
    async fn protected_versions(
        &self,
        binary: ManagedBinary,
        current_version: &str,
    ) -> Option<Vec<Version>> {
        let mut protected = Vec::new();

        let running = current_version.trim().trim_start_matches('v');
        if !running.is_empty() {
            match Version::parse(running) {
                Ok(version) => protected.push(version),
                Err(e) => warn!(%binary, current_version, "Unparseable running version: {e}"),
            }
        }

        if let Some(pinned) = self.pins.get(binary) {
            protected.push(pinned);
        }

        match self.store.read_current(binary).await {
            Ok(Some(activated)) => protected.push(activated),
            Ok(None) => {}
            Err(e) => {
                warn!(%binary, "Cannot read current pointer, skipping tidy: {e}");
                return None;
            }
        }

        Some(protected)
    }
}

impl<F: ArtifactFetcher> Librarian for LibraryManager<F> {
    async fn available(&self, binary: ManagedBinary, target_filename: &str) -> bool {
        match self.installed_record(binary, target_filename).await {
            Ok(record) => record.is_some(),
            Err(e) => {
                debug!(%binary, target_filename, "Treating target as unavailable: {e}");
                false
            }
        }
    }

    async fn add_to_library(
        &self,
        binary: ManagedBinary,
        current_version: &str,
        target_filename: &str,
        descriptor: &TargetDescriptor,
    ) -> Result<()> {
        let deadline = Instant::now() + self.fetch_timeout;
        self.add_to_library_with_deadline(binary, current_version, target_filename, descriptor, deadline)
            .await
    }

    async fn tidy_library(&self, binary: ManagedBinary, current_version: &str) {
        let records = match self.store.list(binary).await {
            Ok(records) => records,
            Err(e) => {
                warn!(%binary, "Cannot list library, skipping tidy: {e}");
                return;
            }
        };
        if records.len() <= 1 {
            return;
        }

        let Some(protected) = self.protected_versions(binary, current_version).await else {
            return;
        };

        let installed: Vec<Version> = records.into_iter().map(|record| record.version).collect();
        let plan = plan_retention(&installed, &protected, self.versions_to_keep);
        debug!(%binary, keep = ?plan.keep, remove = ?plan.remove, "Tidying library");

        for version in &plan.remove {
            match self.store.remove_unless_current(binary, version).await {
                Ok(true) => {}
                Ok(false) => debug!(%binary, %version, "Version was activated during tidy, keeping it"),
                Err(UpdateError::NotFound { .. }) => {
                    debug!(%binary, %version, "Already removed by a concurrent tidy");
                }
                Err(e) => warn!(%binary, %version, "Could not remove old version, skipping: {e}"),
            }
        }

        self.store.sweep_staging(binary, false).await;
    }
}
