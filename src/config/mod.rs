//! Configuration for the autoupdate library.
//!
//! Settings live in a TOML file, by default
//! `<config dir>/agent-autoupdate/config.toml`. Every field is optional;
//! a missing file yields the defaults.
//!
//! ```toml
//! root_dir = "/var/lib/agent/library"
//! versions_to_keep = 2
//! fetch_timeout_secs = 300
//! check_interval_secs = 3600
//! mirror_dir = "/srv/mirror"
//!
//! [pins]
//! agent = "1.2.0"
//! ```
//!
//! The library root can also be supplied through `AUTOUPDATE_ROOT`, which
//! the command line reads before consulting the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use semver::Version;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::constants::{DEFAULT_CHECK_INTERVAL, DEFAULT_FETCH_TIMEOUT, DEFAULT_VERSIONS_TO_KEEP};
use crate::core::{ManagedBinary, UpdateError};
use crate::pin::PinRegistry;

/// Settings for the library, the librarian and the updater loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutoupdateConfig {
    /// Library root. Falls back to the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<PathBuf>,

    /// How many unprotected versions tidy keeps per binary. At least 1.
    #[serde(default = "default_versions_to_keep")]
    pub versions_to_keep: usize,

    /// Deadline for waiting on the install lock plus downloading an artifact.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Period of the updater loop.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Directory serving artifacts by target filename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror_dir: Option<PathBuf>,

    /// Manually pinned versions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pins: BTreeMap<ManagedBinary, String>,
}

fn default_versions_to_keep() -> usize {
    DEFAULT_VERSIONS_TO_KEEP
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT.as_secs()
}

fn default_check_interval_secs() -> u64 {
    DEFAULT_CHECK_INTERVAL.as_secs()
}

impl Default for AutoupdateConfig {
    fn default() -> Self {
        Self {
            root_dir: None,
            versions_to_keep: default_versions_to_keep(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            check_interval_secs: default_check_interval_secs(),
            mirror_dir: None,
            pins: BTreeMap::new(),
        }
    }
}

impl AutoupdateConfig {
    /// Default location of the configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform has no configuration directory.
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Unable to determine configuration directory"))?;
        Ok(dir.join("agent-autoupdate").join("config.toml"))
    }

    /// Load and validate the configuration at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// fails [`validate`](Self::validate).
    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(config)
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A file that does not exist yields the defaults; an explicitly given
    /// path must exist.
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path).await,
            None => {
                let path = Self::default_path()?;
                if fs::try_exists(&path).await.unwrap_or(false) {
                    Self::load(&path).await
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Check value ranges and that every pin is a version.
    pub fn validate(&self) -> std::result::Result<(), UpdateError> {
        if self.versions_to_keep == 0 {
            return Err(UpdateError::Config {
                message: "versions_to_keep must be at least 1".to_string(),
            });
        }
        if self.fetch_timeout_secs == 0 {
            return Err(UpdateError::Config {
                message: "fetch_timeout_secs must be greater than 0".to_string(),
            });
        }
        if self.check_interval_secs == 0 {
            return Err(UpdateError::Config {
                message: "check_interval_secs must be greater than 0".to_string(),
            });
        }
        self.parsed_pins().map(|_| ())
    }

    /// Resolved library root.
    pub fn root_dir(&self) -> Result<PathBuf> {
        if let Some(root) = &self.root_dir {
            return Ok(root.clone());
        }
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Unable to determine local data directory"))?;
        Ok(data_dir.join("agent-autoupdate").join("library"))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Pin registry seeded from the `[pins]` table.
    pub fn pin_registry(&self) -> std::result::Result<PinRegistry, UpdateError> {
        Ok(PinRegistry::from_pins(self.parsed_pins()?))
    }

    fn parsed_pins(&self) -> std::result::Result<Vec<(ManagedBinary, Version)>, UpdateError> {
        self.pins
            .iter()
            .map(|(&binary, raw)| {
                let trimmed = raw.trim().trim_start_matches('v');
                Version::parse(trimmed).map(|version| (binary, version)).map_err(|e| {
                    UpdateError::Config {
                        message: format!("pin for {binary} is not a version ('{raw}'): {e}"),
                    }
                })
            })
            .collect()
    }
}
