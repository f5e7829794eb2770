//! Operator and policy version pins.
//!
//! A pin forces the selector to choose a specific version and stops tidy from
//! removing it. Pins are held per [`ManagedBinary`] and shared between the
//! librarian and the selector through an `Arc<PinRegistry>`.

use dashmap::DashMap;
use semver::Version;
use tracing::info;

use crate::core::ManagedBinary;

/// Concurrent map of active pins.
#[derive(Debug, Default)]
pub struct PinRegistry {
    pins: DashMap<ManagedBinary, Version>,
}

impl PinRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry seeded with `pins`.
    pub fn from_pins(pins: impl IntoIterator<Item = (ManagedBinary, Version)>) -> Self {
        Self {
            pins: pins.into_iter().collect(),
        }
    }

    /// Pin `binary` to `version`, returning the previous pin.
    pub fn set(&self, binary: ManagedBinary, version: Version) -> Option<Version> {
        info!(%binary, %version, "Pinning version");
        self.pins.insert(binary, version)
    }

    /// Remove the pin for `binary`, returning it.
    pub fn clear(&self, binary: ManagedBinary) -> Option<Version> {
        let removed = self.pins.remove(&binary).map(|(_, version)| version);
        if let Some(version) = &removed {
            info!(%binary, %version, "Cleared pin");
        }
        removed
    }

    /// Active pin for `binary`.
    pub fn get(&self, binary: ManagedBinary) -> Option<Version> {
        self.pins.get(&binary).map(|entry| entry.value().clone())
    }
}
