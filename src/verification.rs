//! Digest computation and comparison for installed artifacts.
//!
//! The version store re-reads every artifact after writing it and compares the
//! digest against the target descriptor, so a truncated or corrupted write is
//! never committed.

use std::path::Path;

use sha2::{Digest, Sha256, Sha512};
use tokio::fs;
use tracing::debug;

use crate::core::{IoResultExt, ManagedBinary, Result, UpdateError};
use crate::target::{HashAlgorithm, TargetDescriptor, TargetHash};

/// Verifies artifact contents against a target descriptor.
pub struct ChecksumVerifier;

impl ChecksumVerifier {
    /// Hash `bytes` with `algorithm`.
    pub fn digest_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> TargetHash {
        let digest = match algorithm {
            HashAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
            HashAlgorithm::Sha512 => hex::encode(Sha512::digest(bytes)),
        };
        TargetHash::from_computed(algorithm, digest)
    }

    /// Hash the file at `path` with `algorithm`.
    pub async fn digest_file(algorithm: HashAlgorithm, path: &Path) -> Result<TargetHash> {
        debug!("Computing {} digest for {}", algorithm.prefix(), path.display());
        let contents = fs::read(path).await.io_context("reading artifact", path)?;
        Ok(Self::digest_bytes(algorithm, &contents))
    }

    /// Check the declared size and hash of in-memory bytes.
    pub fn verify_bytes(descriptor: &TargetDescriptor, bytes: &[u8]) -> Result<()> {
        if bytes.len() as u64 != descriptor.size {
            return Err(mismatch(
                descriptor.binary,
                &descriptor.target_filename,
                format!("{} bytes", descriptor.size),
                format!("{} bytes", bytes.len()),
            ));
        }
        let actual = Self::digest_bytes(descriptor.hash.algorithm(), bytes);
        Self::compare(descriptor, &actual)
    }

    /// Re-read the file at `path` and check it against the descriptor.
    pub async fn verify_file(descriptor: &TargetDescriptor, path: &Path) -> Result<()> {
        let actual = Self::digest_file(descriptor.hash.algorithm(), path).await?;
        Self::compare(descriptor, &actual)
    }

    /// Re-read the file at `path` and check it against a digest taken earlier.
    pub async fn verify_file_hash(
        binary: ManagedBinary,
        target: &str,
        expected: &TargetHash,
        path: &Path,
    ) -> Result<()> {
        let actual = Self::digest_file(expected.algorithm(), path).await?;
        if &actual != expected {
            return Err(mismatch(binary, target, expected.to_string(), actual.to_string()));
        }
        Ok(())
    }

    fn compare(descriptor: &TargetDescriptor, actual: &TargetHash) -> Result<()> {
        if actual != &descriptor.hash {
            return Err(mismatch(
                descriptor.binary,
                &descriptor.target_filename,
                descriptor.hash.to_string(),
                actual.to_string(),
            ));
        }
        Ok(())
    }
}

fn mismatch(binary: ManagedBinary, target: &str, expected: String, actual: String) -> UpdateError {
    UpdateError::VerificationMismatch {
        binary,
        target: target.to_string(),
        expected,
        actual,
    }
}
