//! Verified target metadata and target filename parsing.
//!
//! A [`TargetDescriptor`] is produced by the external metadata client after it
//! has checked the release against the trust root. The library treats its hash
//! and size as ground truth and never performs signature verification itself.

use std::fmt;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::core::{ManagedBinary, Result, UpdateError};

/// Digest algorithms accepted in target descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-256, 64 hex characters
    Sha256,
    /// SHA-512, 128 hex characters
    Sha512,
}

impl HashAlgorithm {
    /// Prefix used in the `algorithm:digest` string form.
    pub const fn prefix(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    /// Length of the hex-encoded digest.
    pub const fn hex_len(self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 64,
            HashAlgorithm::Sha512 => 128,
        }
    }
}

/// A content hash, normalized to lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetHash {
    algorithm: HashAlgorithm,
    digest: String,
}

impl TargetHash {
    /// Build a hash from an algorithm and a hex digest.
    pub fn new(algorithm: HashAlgorithm, digest: &str) -> Result<Self> {
        let digest = digest.trim().to_ascii_lowercase();
        if digest.len() != algorithm.hex_len() || hex::decode(&digest).is_err() {
            return Err(UpdateError::InvalidTarget {
                target: digest,
                reason: format!(
                    "expected {} hex characters for {}",
                    algorithm.hex_len(),
                    algorithm.prefix()
                ),
            });
        }
        Ok(Self {
            algorithm,
            digest,
        })
    }

    /// Wrap a digest freshly produced by a hasher.
    pub(crate) fn from_computed(algorithm: HashAlgorithm, digest: String) -> Self {
        Self {
            algorithm,
            digest,
        }
    }

    /// The digest algorithm.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Lowercase hex digest, without prefix.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for TargetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.prefix(), self.digest)
    }
}

impl FromStr for TargetHash {
    type Err = UpdateError;

    /// Accepts `sha256:<hex>`, `sha512:<hex>`, or a bare hex digest whose
    /// length selects the algorithm.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.split_once(':') {
            Some((prefix, digest)) => {
                let algorithm = match prefix.to_ascii_lowercase().as_str() {
                    "sha256" => HashAlgorithm::Sha256,
                    "sha512" => HashAlgorithm::Sha512,
                    other => {
                        return Err(UpdateError::InvalidTarget {
                            target: s.to_string(),
                            reason: format!("unsupported hash algorithm '{other}'"),
                        });
                    }
                };
                Self::new(algorithm, digest)
            }
            None if s.len() == HashAlgorithm::Sha512.hex_len() => {
                Self::new(HashAlgorithm::Sha512, s)
            }
            None => Self::new(HashAlgorithm::Sha256, s),
        }
    }
}

impl TryFrom<String> for TargetHash {
    type Error = UpdateError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TargetHash> for String {
    fn from(value: TargetHash) -> Self {
        value.to_string()
    }
}

/// Verified description of one release artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// Binary this artifact belongs to
    pub binary: ManagedBinary,
    /// Platform/arch-qualified target filename
    pub target_filename: String,
    /// Content hash declared by the verified metadata
    pub hash: TargetHash,
    /// Declared artifact size in bytes
    pub size: u64,
    /// Opaque verification material from the metadata client
    #[serde(default)]
    pub custom: serde_json::Value,
}

impl TargetDescriptor {
    /// Create a descriptor with no custom metadata.
    pub fn new(
        binary: ManagedBinary,
        target_filename: impl Into<String>,
        hash: TargetHash,
        size: u64,
    ) -> Self {
        Self {
            binary,
            target_filename: target_filename.into(),
            hash,
            size,
            custom: serde_json::Value::Null,
        }
    }

    /// Attach the metadata client's verification material.
    pub fn with_custom(mut self, custom: serde_json::Value) -> Self {
        self.custom = custom;
        self
    }

    /// Version encoded in the target filename.
    pub fn version(&self) -> Result<Version> {
        version_from_target(self.binary, &self.target_filename)
    }
}

const TARGET_EXTENSIONS: &[&str] = &[".tar.gz", ".tgz", ".zip", ".exe"];

const PLATFORM_TOKENS: &[&str] = &[
    "linux", "darwin", "macos", "windows", "amd64", "x86_64", "arm64", "aarch64", "386", "arm",
    "universal",
];

/// Extract the release version from a target filename.
///
/// Target filenames look like `<binary>-<version>[-<os>][-<arch>][.ext]`,
/// optionally behind a repository path such as `agent/linux/`. Trailing
/// OS and architecture tokens are stripped before the remainder is parsed as
/// a semantic version, so `agent-1.3.0-beta.1-linux-arm64.tar.gz` yields
/// `1.3.0-beta.1`.
pub fn version_from_target(binary: ManagedBinary, target_filename: &str) -> Result<Version> {
    let invalid = |reason: String| UpdateError::InvalidTarget {
        target: target_filename.to_string(),
        reason,
    };

    let file_name = target_filename.rsplit('/').next().unwrap_or(target_filename);
    let stem = TARGET_EXTENSIONS
        .iter()
        .find_map(|ext| file_name.strip_suffix(ext))
        .unwrap_or(file_name);

    let rest = stem
        .strip_prefix(binary.name())
        .and_then(|rest| rest.strip_prefix('-'))
        .ok_or_else(|| invalid(format!("expected '{}-<version>'", binary.name())))?;

    let mut tokens: Vec<&str> = rest.split('-').collect();
    while tokens.len() > 1 && tokens.last().is_some_and(|token| PLATFORM_TOKENS.contains(token)) {
        tokens.pop();
    }

    let version = tokens.join("-");
    Version::parse(&version).map_err(|e| invalid(format!("'{version}' is not a version: {e}")))
}
