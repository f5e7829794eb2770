//! Error taxonomy for the autoupdate library.
//!
//! Every failure in the version store, the librarian and the selector is
//! returned as a typed [`UpdateError`]. Nothing in this crate panics or aborts
//! the host process on these conditions; the caller decides whether to retry
//! on the next polling cycle or to surface a security event.
//!
//! The variants map onto the retry policy the updater loop applies:
//!
//! | Variant                 | Retry next cycle | Security relevant |
//! |-------------------------|------------------|-------------------|
//! | `Fetch`                 | yes              | no                |
//! | `VerificationMismatch`  | no (same bytes)  | yes               |
//! | `Io`                    | yes              | no                |
//! | `NotFound`              | n/a (caller bug) | no                |
//! | `NoRunnableVersion`     | yes              | no                |
//! | `InvalidTarget`         | no               | no                |
//! | `Config`                | no               | no                |

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use super::binary::ManagedBinary;

/// Failure reported by the injected fetch capability or the metadata client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network or storage failure while transferring the target.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The caller's deadline expired before the target was fetched.
    #[error("fetch did not complete within {0:?}")]
    TimedOut(Duration),

    /// The remote does not have the requested target.
    #[error("target '{0}' not found")]
    NotFound(String),
}

/// Errors produced by the version store, librarian and selector.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// Downloading the artifact failed; the library is untouched.
    #[error("failed to fetch target: {0}")]
    Fetch(#[from] FetchError),

    /// The artifact bytes do not match the verified target descriptor.
    ///
    /// Raised both for declared-size disagreements and for post-write hash
    /// re-checks. Treat as a tamper or corruption signal.
    #[error("verification mismatch for {binary} target '{target}': expected {expected}, got {actual}")]
    VerificationMismatch {
        /// Binary whose target failed verification
        binary: ManagedBinary,
        /// Target filename being installed
        target: String,
        /// Value declared by the target descriptor
        expected: String,
        /// Value observed on disk
        actual: String,
    },

    /// Local filesystem failure.
    #[error("I/O error while {operation} {}: {source}", .path.display())]
    Io {
        /// What was being attempted
        operation: String,
        /// Path involved in the failed operation
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The requested version is not installed.
    #[error("{binary} version {version} is not installed")]
    NotFound {
        /// Binary that was queried
        binary: ManagedBinary,
        /// Version that was expected
        version: String,
    },

    /// The library holds no runnable version for the binary.
    #[error("no runnable version of {binary} is installed")]
    NoRunnableVersion {
        /// Binary with an empty library
        binary: ManagedBinary,
    },

    /// A target filename or descriptor could not be interpreted.
    #[error("invalid target '{target}': {reason}")]
    InvalidTarget {
        /// Offending target filename
        target: String,
        /// Why it was rejected
        reason: String,
    },

    /// Invalid configuration or operator input.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the problem
        message: String,
    },
}

impl UpdateError {
    /// Whether the updater loop should simply try again on its next cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpdateError::Fetch(_) | UpdateError::Io { .. } | UpdateError::NoRunnableVersion { .. }
        )
    }

    /// Whether the error must be surfaced as a security-relevant event.
    pub fn is_security_relevant(&self) -> bool {
        matches!(self, UpdateError::VerificationMismatch { .. })
    }

    pub(crate) fn io(
        operation: impl Into<String>,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        UpdateError::Io {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }
}

/// Attach an operation description and path to `std::io` results.
pub trait IoResultExt<T> {
    /// Convert the error into [`UpdateError::Io`].
    fn io_context(self, operation: &str, path: &Path) -> Result<T, UpdateError>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn io_context(self, operation: &str, path: &Path) -> Result<T, UpdateError> {
        self.map_err(|source| UpdateError::io(operation, path, source))
    }
}

/// Result alias used across the library.
pub type Result<T, E = UpdateError> = std::result::Result<T, E>;
