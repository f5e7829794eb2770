//! Identity of the executables kept up to date by this crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::UpdateError;

/// One of the executables managed by the autoupdate library.
///
/// The set is closed and known at compile time. Every on-disk path, lock and
/// pin is namespaced by this value, so operations on different binaries never
/// contend with each other.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ManagedBinary {
    /// The endpoint agent itself.
    Agent,
    /// The companion data-collection daemon.
    Collector,
}

impl ManagedBinary {
    /// Every managed binary, in a stable order.
    pub const ALL: [ManagedBinary; 2] = [ManagedBinary::Agent, ManagedBinary::Collector];

    /// Short name used for directories, lock files and target filename prefixes.
    pub const fn name(self) -> &'static str {
        match self {
            ManagedBinary::Agent => "agent",
            ManagedBinary::Collector => "collector",
        }
    }

    /// File name of the installed executable on this platform.
    pub fn executable_name(self) -> String {
        format!("{}{}", self.name(), std::env::consts::EXE_SUFFIX)
    }
}

impl fmt::Display for ManagedBinary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ManagedBinary {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ManagedBinary::ALL
            .into_iter()
            .find(|binary| binary.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UpdateError::Config {
                message: format!("unknown managed binary '{s}'"),
            })
    }
}
