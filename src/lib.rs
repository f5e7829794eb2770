//! agent-autoupdate - verified binary library for self-updating agents
//!
//! Keeps a small on-disk library of verified versions for each managed binary
//! (the agent itself and its companion collector), decides which of them a new
//! process should run, and prunes old versions without ever deleting the one
//! that is executing or leaving a binary with nothing to run.
//!
//! # Architecture Overview
//!
//! ```text
//! Updater loop ──> Librarian.add_to_library ──> VersionStore.put
//!       │                                            │
//!       └──────> CurrentSelector.select/activate <───┘
//!                        │
//!                        └──> current pointer ──> process supervisor
//! ```
//!
//! - **Version store**: one directory per installed version, committed by
//!   rename only after the artifact is written, re-hashed and marked
//! - **Librarian**: check-lock-check installs, one in flight per binary,
//!   retention-based tidy
//! - **Selector**: pinned-or-newest choice and an atomically replaced pointer
//!
//! # Core Modules
//!
//! - [`core`] - managed binary identity and the error taxonomy
//! - [`target`] - verified target descriptors and filename version parsing
//! - [`verification`] - SHA-256 / SHA-512 artifact checks
//! - [`store`] - the version store and its on-disk layout
//! - [`library`] - the [`Librarian`](library::Librarian) trait and
//!   [`LibraryManager`](library::LibraryManager)
//! - [`selector`] - current-version selection and activation
//! - [`pin`] - manual version pins
//! - [`fetch`] - artifact fetch capability and the local mirror fetcher
//! - [`updater`] - the polling loop that drives everything above
//! - [`config`] - TOML configuration
//! - [`cli`] - operator command line
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agent_autoupdate::core::ManagedBinary;
//! use agent_autoupdate::fetch::MirrorFetcher;
//! use agent_autoupdate::library::{Librarian, LibraryManager};
//! use agent_autoupdate::pin::PinRegistry;
//! use agent_autoupdate::selector::CurrentSelector;
//! use agent_autoupdate::store::VersionStore;
//!
//! # async fn example(descriptor: agent_autoupdate::target::TargetDescriptor) -> anyhow::Result<()> {
//! let store = VersionStore::new("/var/lib/agent/library");
//! let pins = Arc::new(PinRegistry::new());
//! let librarian = LibraryManager::new(store.clone(), MirrorFetcher::new("/srv/mirror"), pins.clone());
//! let selector = CurrentSelector::new(store, pins);
//!
//! let target = descriptor.target_filename.clone();
//! librarian.add_to_library(ManagedBinary::Agent, "1.1.0", &target, &descriptor).await?;
//! librarian.tidy_library(ManagedBinary::Agent, "1.1.0").await;
//!
//! let record = selector.select(ManagedBinary::Agent).await?;
//! selector.activate(ManagedBinary::Agent, &record).await?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;

pub mod fetch;
pub mod library;
pub mod pin;
pub mod selector;
pub mod store;
pub mod target;
pub mod updater;
pub mod verification;

pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
