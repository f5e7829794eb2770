use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use agent_autoupdate::core::{ManagedBinary, UpdateError};
use agent_autoupdate::library::{Librarian, LibraryManager};
use agent_autoupdate::test_utils::StubFetcher;
use semver::Version;

use crate::common::TestLibrary;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adds_fetch_once() {
    let lib = TestLibrary::with_fetcher(StubFetcher::new().with_delay(Duration::from_millis(50)));
    let librarian =
        Arc::new(LibraryManager::new(lib.store.clone(), lib.fetcher.clone(), lib.pins.clone()));
    let target = "agent-1.2.0-amd64";
    let descriptor = lib.publish(ManagedBinary::Agent, target);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let librarian = librarian.clone();
        let descriptor = descriptor.clone();
        handles.push(tokio::spawn(async move {
            librarian.add_to_library(ManagedBinary::Agent, "1.0.0", target, &descriptor).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(lib.fetcher.calls(), 1);
    assert_eq!(lib.store.list(ManagedBinary::Agent).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_binaries_install_in_parallel() {
    let delay = Duration::from_millis(500);
    let lib = TestLibrary::with_fetcher(StubFetcher::new().with_delay(delay));
    let agent = lib.publish(ManagedBinary::Agent, "agent-1.0.0");
    let collector = lib.publish(ManagedBinary::Collector, "collector-1.0.0");

    let started = Instant::now();
    let (agent_result, collector_result) = tokio::join!(
        lib.librarian.add_to_library(ManagedBinary::Agent, "", "agent-1.0.0", &agent),
        lib.librarian.add_to_library(ManagedBinary::Collector, "", "collector-1.0.0", &collector),
    );
    agent_result.unwrap();
    collector_result.unwrap();

    // Serialized installs would take at least twice the fetch delay
    assert!(started.elapsed() < delay * 2 - Duration::from_millis(50));
    assert_eq!(lib.fetcher.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tidy_during_install_never_sees_partial_record() {
    let lib = TestLibrary::with_fetcher(StubFetcher::new().with_delay(Duration::from_millis(200)));
    let librarian = Arc::new(
        LibraryManager::new(lib.store.clone(), lib.fetcher.clone(), lib.pins.clone()).with_versions_to_keep(1),
    );
    for target in ["agent-1.0.0", "agent-1.1.0"] {
        let descriptor = lib.publish(ManagedBinary::Agent, target);
        librarian.add_to_library(ManagedBinary::Agent, "", target, &descriptor).await.unwrap();
    }

    let descriptor = lib.publish(ManagedBinary::Agent, "agent-1.2.0");
    let installer = {
        let librarian = librarian.clone();
        tokio::spawn(async move {
            librarian.add_to_library(ManagedBinary::Agent, "1.0.0", "agent-1.2.0", &descriptor).await
        })
    };

    while !installer.is_finished() {
        librarian.tidy_library(ManagedBinary::Agent, "1.0.0").await;
        for record in lib.store.list(ManagedBinary::Agent).await.unwrap() {
            assert!(record.artifact_path.is_file());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    installer.await.unwrap().unwrap();

    librarian.tidy_library(ManagedBinary::Agent, "1.0.0").await;
    let versions: Vec<Version> =
        lib.store.list(ManagedBinary::Agent).await.unwrap().into_iter().map(|r| r.version).collect();
    assert_eq!(versions, vec![Version::new(1, 2, 0), Version::new(1, 0, 0)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_activate_racing_tidy_keeps_pointer_valid() {
    let lib = TestLibrary::new();
    let librarian = Arc::new(
        LibraryManager::new(lib.store.clone(), lib.fetcher.clone(), lib.pins.clone()).with_versions_to_keep(1),
    );
    let first = lib.publish(ManagedBinary::Agent, "agent-1.0.0");
    librarian.add_to_library(ManagedBinary::Agent, "", "agent-1.0.0", &first).await.unwrap();
    let record = lib.selector.select(ManagedBinary::Agent).await.unwrap();
    lib.selector.activate(ManagedBinary::Agent, &record).await.unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let store = lib.store.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let mut reads = 0usize;
            while !done.load(Ordering::Relaxed) {
                // Replacement is atomic, so the pointer is never missing or torn
                let current = store.read_current(ManagedBinary::Agent).await.unwrap();
                assert!(current.is_some());
                reads += 1;
                tokio::task::yield_now().await;
            }
            reads
        })
    };

    for minor in 1..=8u64 {
        let target = format!("agent-1.{minor}.0");
        let descriptor = lib.publish(ManagedBinary::Agent, &target);
        librarian.add_to_library(ManagedBinary::Agent, "", &target, &descriptor).await.unwrap();

        let selected = lib.selector.select(ManagedBinary::Agent).await.unwrap();
        let (activated, ()) = tokio::join!(
            lib.selector.activate(ManagedBinary::Agent, &selected),
            librarian.tidy_library(ManagedBinary::Agent, ""),
        );
        activated.unwrap();

        let current = lib.selector.current(ManagedBinary::Agent).await.unwrap();
        assert_eq!(current.map(|r| r.version), Some(Version::new(1, minor, 0)));
    }

    done.store(true, Ordering::Relaxed);
    assert!(reader.await.unwrap() > 0);

    // Old versions were pruned along the way
    assert!(lib.store.list(ManagedBinary::Agent).await.unwrap().len() <= 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_activating_old_version_racing_tidy_never_dangles() {
    let lib = TestLibrary::new();
    let librarian = Arc::new(
        LibraryManager::new(lib.store.clone(), lib.fetcher.clone(), lib.pins.clone()).with_versions_to_keep(1),
    );

    for round in 1..=20u64 {
        let old = Version::new(round, 0, 0);
        let new = Version::new(round, 1, 0);
        for version in [&old, &new] {
            let target = format!("agent-{version}");
            let descriptor = lib.publish(ManagedBinary::Agent, &target);
            librarian.add_to_library(ManagedBinary::Agent, "", &target, &descriptor).await.unwrap();
        }
        let newest = lib.selector.select(ManagedBinary::Agent).await.unwrap();
        lib.selector.activate(ManagedBinary::Agent, &newest).await.unwrap();

        // Rolling back to a version outside the retention window while tidy runs
        let old_record = lib.store.get(ManagedBinary::Agent, &old).await.unwrap().unwrap();
        let (activated, ()) = tokio::join!(
            lib.selector.activate(ManagedBinary::Agent, &old_record),
            librarian.tidy_library(ManagedBinary::Agent, ""),
        );

        let pointer = lib.store.read_current(ManagedBinary::Agent).await.unwrap().unwrap();
        assert!(
            lib.store.get(ManagedBinary::Agent, &pointer).await.unwrap().is_some(),
            "round {round}: pointer names removed version {pointer}"
        );
        match activated {
            Ok(()) => assert_eq!(pointer, old),
            Err(UpdateError::NotFound { .. }) => assert_eq!(pointer, new),
            Err(e) => panic!("round {round}: unexpected error {e}"),
        }
    }
}
