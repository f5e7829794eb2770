//! Shared fixtures for the integration suite.

// Not every helper is used by every test module
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use agent_autoupdate::core::ManagedBinary;
use agent_autoupdate::library::LibraryManager;
use agent_autoupdate::pin::PinRegistry;
use agent_autoupdate::selector::CurrentSelector;
use agent_autoupdate::store::VersionStore;
use agent_autoupdate::target::TargetDescriptor;
use agent_autoupdate::test_utils::{StubFetcher, descriptor_for, init_test_logging};
use tempfile::TempDir;

/// A library rooted in a temporary directory with a stub fetcher.
pub struct TestLibrary {
    pub temp_dir: TempDir,
    pub store: VersionStore,
    pub pins: Arc<PinRegistry>,
    pub fetcher: Arc<StubFetcher>,
    pub librarian: LibraryManager<Arc<StubFetcher>>,
    pub selector: CurrentSelector,
}

impl TestLibrary {
    pub fn new() -> Self {
        Self::with_fetcher(StubFetcher::new())
    }

    pub fn with_fetcher(fetcher: StubFetcher) -> Self {
        init_test_logging(None);
        let temp_dir = TempDir::new().unwrap();
        let store = VersionStore::new(temp_dir.path());
        let pins = Arc::new(PinRegistry::new());
        let fetcher = Arc::new(fetcher);
        let librarian = LibraryManager::new(store.clone(), fetcher.clone(), pins.clone());
        let selector = CurrentSelector::new(store.clone(), pins.clone());
        Self {
            temp_dir,
            store,
            pins,
            fetcher,
            librarian,
            selector,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Serve `target` from the stub fetcher and return its descriptor.
    pub fn publish(&self, binary: ManagedBinary, target: &str) -> TargetDescriptor {
        let bytes = artifact_bytes(target);
        let descriptor = descriptor_for(binary, target, &bytes);
        self.fetcher.serve(target, bytes);
        descriptor
    }
}

/// Distinct, executable-looking content per target.
pub fn artifact_bytes(target: &str) -> Vec<u8> {
    format!("#!/bin/sh\necho '{target}'\n").into_bytes()
}
