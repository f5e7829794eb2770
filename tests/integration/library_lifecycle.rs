use std::sync::Arc;
use std::time::Duration;

use agent_autoupdate::core::{FetchError, ManagedBinary, UpdateError};
use agent_autoupdate::library::{Librarian, LibraryManager};
use agent_autoupdate::pin::PinRegistry;
use agent_autoupdate::selector::CurrentSelector;
use agent_autoupdate::store::VersionStore;
use agent_autoupdate::test_utils::{StubFetcher, descriptor_for, tar_gz_bytes};
use semver::Version;

use crate::common::{TestLibrary, artifact_bytes};

async fn install(lib: &TestLibrary, librarian: &impl Librarian, target: &str) {
    let descriptor = lib.publish(ManagedBinary::Agent, target);
    librarian.add_to_library(ManagedBinary::Agent, "", target, &descriptor).await.unwrap();
}

async fn installed(lib: &TestLibrary) -> Vec<Version> {
    lib.store
        .list(ManagedBinary::Agent)
        .await
        .unwrap()
        .into_iter()
        .map(|record| record.version)
        .collect()
}

fn versions(raw: &[&str]) -> Vec<Version> {
    raw.iter().map(|v| Version::parse(v).unwrap()).collect()
}

#[tokio::test]
async fn test_empty_library_to_first_install() {
    let lib = TestLibrary::new();
    let binary = ManagedBinary::Agent;
    let target = "agent-1.2.0-amd64";

    assert!(!lib.librarian.available(binary, target).await);
    assert!(matches!(lib.selector.select(binary).await, Err(UpdateError::NoRunnableVersion { .. })));

    let descriptor = lib.publish(binary, target);
    lib.librarian.add_to_library(binary, "", target, &descriptor).await.unwrap();

    assert!(lib.librarian.available(binary, target).await);
    let record = lib.selector.select(binary).await.unwrap();
    assert_eq!(record.version, Version::new(1, 2, 0));
    assert_eq!(record.target_filename(), target);
    assert_eq!(tokio::fs::read(&record.artifact_path).await.unwrap(), artifact_bytes(target));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = tokio::fs::metadata(&record.artifact_path).await.unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    // Calling again is a no-op without a second download
    lib.librarian.add_to_library(binary, "1.2.0", target, &descriptor).await.unwrap();
    assert_eq!(lib.fetcher.calls(), 1);
}

#[tokio::test]
async fn test_archived_target_selects_unpacked_executable() {
    let lib = TestLibrary::new();
    let binary = ManagedBinary::Agent;
    let target = "agent-1.3.0-linux-amd64.tar.gz";
    let executable = b"#!/bin/sh\necho agent 1.3.0\n";
    let archive = tar_gz_bytes(&[(binary.executable_name().as_str(), executable.as_slice())]);
    let descriptor = descriptor_for(binary, target, &archive);
    lib.fetcher.serve(target, archive);

    lib.librarian.add_to_library(binary, "", target, &descriptor).await.unwrap();
    assert!(lib.librarian.available(binary, target).await);

    let record = lib.selector.select(binary).await.unwrap();
    assert_eq!(record.version, Version::new(1, 3, 0));
    assert_eq!(record.target_filename(), target);
    // The selected file is the executable, not the gzip stream
    assert_eq!(tokio::fs::read(&record.artifact_path).await.unwrap(), executable);
}

#[tokio::test]
async fn test_hash_mismatch_leaves_library_unchanged() {
    let lib = TestLibrary::new();
    let binary = ManagedBinary::Agent;
    install(&lib, &lib.librarian, "agent-1.0.0").await;

    let target = "agent-1.1.0-linux-amd64";
    let descriptor = descriptor_for(binary, target, b"what the metadata promised");
    lib.fetcher.serve(target, b"what the mirror actually sent".to_vec());

    let err = lib.librarian.add_to_library(binary, "1.0.0", target, &descriptor).await.unwrap_err();
    assert!(matches!(err, UpdateError::VerificationMismatch { .. }));
    assert!(err.is_security_relevant());
    assert!(!err.is_retryable());

    assert!(!lib.librarian.available(binary, target).await);
    assert_eq!(installed(&lib).await, versions(&["1.0.0"]));
}

#[tokio::test]
async fn test_fetch_failure_is_retryable() {
    let lib = TestLibrary::with_fetcher(
        StubFetcher::new().failing_with(FetchError::Transport("connection reset".to_string())),
    );
    let binary = ManagedBinary::Collector;
    let descriptor = descriptor_for(binary, "collector-3.0.0", b"collector");

    let err = lib
        .librarian
        .add_to_library(binary, "", "collector-3.0.0", &descriptor)
        .await
        .unwrap_err();
    assert!(matches!(err, UpdateError::Fetch(FetchError::Transport(_))));
    assert!(err.is_retryable());
    assert!(lib.store.list(binary).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fetch_deadline_leaves_library_untouched() {
    let lib = TestLibrary::with_fetcher(StubFetcher::new().with_delay(Duration::from_secs(5)));
    let librarian = LibraryManager::new(lib.store.clone(), lib.fetcher.clone(), lib.pins.clone())
        .with_fetch_timeout(Duration::from_millis(100));
    let descriptor = lib.publish(ManagedBinary::Agent, "agent-2.0.0");

    let err = librarian
        .add_to_library(ManagedBinary::Agent, "", "agent-2.0.0", &descriptor)
        .await
        .unwrap_err();
    assert!(matches!(err, UpdateError::Fetch(FetchError::TimedOut(_))));
    assert!(installed(&lib).await.is_empty());
    assert!(!librarian.is_installing(ManagedBinary::Agent));
}

#[tokio::test]
async fn test_descriptor_for_other_target_is_rejected() {
    let lib = TestLibrary::new();
    let descriptor = lib.publish(ManagedBinary::Agent, "agent-1.0.0");

    let err = lib
        .librarian
        .add_to_library(ManagedBinary::Agent, "", "agent-1.1.0", &descriptor)
        .await
        .unwrap_err();
    assert!(matches!(err, UpdateError::InvalidTarget { .. }));
    assert_eq!(lib.fetcher.calls(), 0);
}

#[tokio::test]
async fn test_tidy_keeps_current_and_newest_two() {
    let lib = TestLibrary::new();
    for target in ["agent-1.0.0", "agent-1.1.0", "agent-1.2.0"] {
        install(&lib, &lib.librarian, target).await;
    }

    lib.librarian.tidy_library(ManagedBinary::Agent, "1.0.0").await;
    assert_eq!(installed(&lib).await, versions(&["1.2.0", "1.1.0", "1.0.0"]));
}

#[tokio::test]
async fn test_tidy_with_window_of_one() {
    let lib = TestLibrary::new();
    let librarian = LibraryManager::new(lib.store.clone(), lib.fetcher.clone(), lib.pins.clone())
        .with_versions_to_keep(1);
    for target in ["agent-1.0.0", "agent-1.1.0", "agent-1.2.0"] {
        install(&lib, &librarian, target).await;
    }

    librarian.tidy_library(ManagedBinary::Agent, "1.0.0").await;
    assert_eq!(installed(&lib).await, versions(&["1.2.0", "1.0.0"]));
}

#[tokio::test]
async fn test_tidy_never_removes_pinned_or_activated() {
    let lib = TestLibrary::new();
    let librarian = LibraryManager::new(lib.store.clone(), lib.fetcher.clone(), lib.pins.clone())
        .with_versions_to_keep(1);
    for target in ["agent-1.0.0", "agent-1.1.0", "agent-1.2.0", "agent-1.3.0"] {
        install(&lib, &librarian, target).await;
    }

    lib.pins.set(ManagedBinary::Agent, Version::new(1, 0, 0));
    let activated = lib.store.get(ManagedBinary::Agent, &Version::new(1, 1, 0)).await.unwrap().unwrap();
    lib.selector.activate(ManagedBinary::Agent, &activated).await.unwrap();

    librarian.tidy_library(ManagedBinary::Agent, "").await;
    assert_eq!(installed(&lib).await, versions(&["1.3.0", "1.1.0", "1.0.0"]));

    // The pin wins selection even though newer versions exist
    assert_eq!(lib.selector.select(ManagedBinary::Agent).await.unwrap().version, Version::new(1, 0, 0));
}

#[tokio::test]
async fn test_tidy_never_empties_library() {
    let lib = TestLibrary::new();
    let librarian = LibraryManager::new(lib.store.clone(), lib.fetcher.clone(), lib.pins.clone())
        .with_versions_to_keep(1);
    install(&lib, &librarian, "agent-0.9.0").await;

    // Reported running version is newer than anything installed
    librarian.tidy_library(ManagedBinary::Agent, "5.0.0").await;
    librarian.tidy_library(ManagedBinary::Agent, "not-a-version").await;
    assert_eq!(installed(&lib).await, versions(&["0.9.0"]));
}

#[tokio::test]
async fn test_tidy_is_per_binary() {
    let lib = TestLibrary::new();
    let librarian = LibraryManager::new(lib.store.clone(), lib.fetcher.clone(), lib.pins.clone())
        .with_versions_to_keep(1);
    for (binary, target) in [
        (ManagedBinary::Collector, "collector-1.0.0"),
        (ManagedBinary::Collector, "collector-1.1.0"),
        (ManagedBinary::Agent, "agent-1.0.0"),
        (ManagedBinary::Agent, "agent-1.1.0"),
    ] {
        let descriptor = lib.publish(binary, target);
        librarian.add_to_library(binary, "", target, &descriptor).await.unwrap();
    }

    librarian.tidy_library(ManagedBinary::Agent, "").await;

    assert_eq!(installed(&lib).await, versions(&["1.1.0"]));
    assert_eq!(lib.store.list(ManagedBinary::Collector).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_pointer_persists_across_instances() {
    let lib = TestLibrary::new();
    install(&lib, &lib.librarian, "agent-1.0.0").await;
    install(&lib, &lib.librarian, "agent-1.1.0").await;
    let record = lib.selector.select(ManagedBinary::Agent).await.unwrap();
    lib.selector.activate(ManagedBinary::Agent, &record).await.unwrap();

    // A fresh process sees the same library and pointer
    let store = VersionStore::new(lib.root());
    let selector = CurrentSelector::new(store, Arc::new(PinRegistry::new()));
    let current = selector.current(ManagedBinary::Agent).await.unwrap().unwrap();
    assert_eq!(current.version, Version::new(1, 1, 0));
    assert_eq!(
        selector.current_executable(ManagedBinary::Agent).await.unwrap(),
        Some(record.artifact_path)
    );
}
