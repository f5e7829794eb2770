//! Leftovers from a process killed mid-install or mid-removal.

use agent_autoupdate::core::ManagedBinary;
use agent_autoupdate::library::Librarian;
use semver::Version;

use crate::common::TestLibrary;

#[tokio::test]
async fn test_interrupted_install_is_invisible_and_swept() {
    let lib = TestLibrary::new();
    let staging = lib.root().join("agent").join(".staging").join("install-a1b2c3");
    tokio::fs::create_dir_all(&staging).await.unwrap();
    tokio::fs::write(staging.join("agent"), b"half an artifa").await.unwrap();

    assert!(lib.store.list(ManagedBinary::Agent).await.unwrap().is_empty());

    let descriptor = lib.publish(ManagedBinary::Agent, "agent-1.0.0");
    lib.librarian.add_to_library(ManagedBinary::Agent, "", "agent-1.0.0", &descriptor).await.unwrap();

    assert!(!staging.exists());
    assert_eq!(lib.store.list(ManagedBinary::Agent).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_directory_without_marker_is_not_a_record() {
    let lib = TestLibrary::new();
    let squatter = lib.root().join("agent").join("1.4.0");
    tokio::fs::create_dir_all(&squatter).await.unwrap();
    tokio::fs::write(squatter.join("agent"), b"unverified").await.unwrap();

    assert!(!lib.librarian.available(ManagedBinary::Agent, "agent-1.4.0").await);
    assert!(lib.selector.select(ManagedBinary::Agent).await.is_err());

    // A real install of the same version replaces the debris
    let descriptor = lib.publish(ManagedBinary::Agent, "agent-1.4.0");
    lib.librarian.add_to_library(ManagedBinary::Agent, "", "agent-1.4.0", &descriptor).await.unwrap();

    let record = lib.selector.select(ManagedBinary::Agent).await.unwrap();
    assert_eq!(record.version, Version::new(1, 4, 0));
    assert_ne!(tokio::fs::read(&record.artifact_path).await.unwrap(), b"unverified");
}

#[tokio::test]
async fn test_interrupted_removal_is_swept_by_tidy() {
    let lib = TestLibrary::new();
    for target in ["agent-1.0.0", "agent-1.1.0"] {
        let descriptor = lib.publish(ManagedBinary::Agent, target);
        lib.librarian.add_to_library(ManagedBinary::Agent, "", target, &descriptor).await.unwrap();
    }
    let trash = lib.root().join("agent").join(".staging").join("remove-5f0c");
    tokio::fs::create_dir_all(&trash).await.unwrap();
    tokio::fs::write(trash.join("agent"), b"old").await.unwrap();

    lib.librarian.tidy_library(ManagedBinary::Agent, "1.1.0").await;

    assert!(!trash.exists());
    assert_eq!(lib.store.list(ManagedBinary::Agent).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_garbage_pointer_reads_as_unset() {
    let lib = TestLibrary::new();
    let descriptor = lib.publish(ManagedBinary::Agent, "agent-1.0.0");
    lib.librarian.add_to_library(ManagedBinary::Agent, "", "agent-1.0.0", &descriptor).await.unwrap();

    tokio::fs::write(lib.store.pointer_path(ManagedBinary::Agent), b"\0\0garbage").await.unwrap();
    assert!(lib.selector.current(ManagedBinary::Agent).await.unwrap().is_none());

    // Activation repairs it
    let record = lib.selector.select(ManagedBinary::Agent).await.unwrap();
    lib.selector.activate(ManagedBinary::Agent, &record).await.unwrap();
    assert_eq!(lib.selector.current(ManagedBinary::Agent).await.unwrap(), Some(record));
}
