//! The polling loop that drives the library.
//!
//! Once per cycle and per managed binary the updater asks the metadata client
//! for the latest verified target, hands it to the [`Librarian`], tidies, and
//! switches the Current Pointer if the selection changed:
//!
//! ```text
//! latest_target -> available? -> add_to_library -> tidy_library -> select -> activate
//! ```
//!
//! Every failure is logged and retried on the next cycle. Verification
//! mismatches are reported on the `autoupdate::security` tracing target.
//!
//! Cycles run on a timer and on demand through an [`UpdaterHandle`]. The loop
//! holds no global state; everything it needs is owned by the [`Updater`].

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use semver::Version;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::AutoupdateConfig;
use crate::constants::{DEFAULT_CHECK_INTERVAL, MIN_CHECK_INTERVAL, TRIGGER_CHANNEL_CAPACITY};
use crate::core::{FetchError, ManagedBinary, Result, UpdateError};
use crate::library::Librarian;
use crate::selector::CurrentSelector;
use crate::target::TargetDescriptor;

/// Source of verified release metadata.
///
/// Implementations are responsible for validating the metadata chain before
/// returning a descriptor; the updater trusts what it is given.
pub trait MetadataClient: Send + Sync {
    /// The newest release published for `binary`.
    fn latest_target(
        &self,
        binary: ManagedBinary,
    ) -> impl Future<Output = std::result::Result<TargetDescriptor, FetchError>> + Send;
}

/// On-demand request sent to a running [`Updater`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateTrigger {
    /// Run a cycle for every managed binary now.
    CheckNow,
    /// Run a cycle for a single binary now.
    CheckBinary(ManagedBinary),
}

/// Result of one update cycle for one binary.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The pointer already named the selected version.
    UpToDate {
        /// Version the pointer names
        version: Version,
    },
    /// The pointer was moved.
    Activated {
        /// Version previously named, if any
        previous: Option<Version>,
        /// Version now named
        version: Version,
    },
    /// The cycle stopped early. The library and pointer are unchanged by the
    /// failing step.
    Failed(UpdateError),
}

impl CycleOutcome {
    /// Whether the cycle ended with an error.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Caller side of a spawned [`Updater`].
#[derive(Debug, Clone)]
pub struct UpdaterHandle {
    triggers: mpsc::Sender<UpdateTrigger>,
    shutdown: watch::Sender<bool>,
}

impl UpdaterHandle {
    /// Request a cycle for all binaries.
    ///
    /// Returns `false` if the request was dropped because the queue is full
    /// or the updater has stopped. A full queue already holds a pending check.
    pub fn check_now(&self) -> bool {
        self.send(UpdateTrigger::CheckNow)
    }

    /// Request a cycle for `binary`.
    pub fn check_binary(&self, binary: ManagedBinary) -> bool {
        self.send(UpdateTrigger::CheckBinary(binary))
    }

    /// Ask the updater to stop after the cycle in progress, if any.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    fn send(&self, trigger: UpdateTrigger) -> bool {
        match self.triggers.try_send(trigger) {
            Ok(()) => true,
            Err(e) => {
                debug!(?trigger, "Dropping update trigger: {e}");
                false
            }
        }
    }
}

/// Periodic driver of the [`Librarian`] and [`CurrentSelector`].
pub struct Updater<L, M> {
    librarian: L,
    metadata: M,
    selector: CurrentSelector,
    binaries: Vec<ManagedBinary>,
    running: HashMap<ManagedBinary, String>,
    check_interval: Duration,
}

impl<L: Librarian, M: MetadataClient> Updater<L, M> {
    /// An updater for every managed binary.
    pub fn new(librarian: L, metadata: M, selector: CurrentSelector) -> Self {
        Self {
            librarian,
            metadata,
            selector,
            binaries: ManagedBinary::ALL.to_vec(),
            running: HashMap::new(),
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }

    /// An updater for every managed binary, checking as often as `config` says.
    pub fn from_config(
        librarian: L,
        metadata: M,
        selector: CurrentSelector,
        config: &AutoupdateConfig,
    ) -> Self {
        Self::new(librarian, metadata, selector).with_check_interval(config.check_interval())
    }

    /// Restrict the updater to `binaries`.
    pub fn with_binaries(mut self, binaries: impl IntoIterator<Item = ManagedBinary>) -> Self {
        self.binaries = binaries.into_iter().collect();
        self.binaries.sort();
        self.binaries.dedup();
        self
    }

    /// Report the version the process for `binary` is executing.
    ///
    /// Tidy never removes this version.
    pub fn with_running_version(mut self, binary: ManagedBinary, version: impl Into<String>) -> Self {
        self.running.insert(binary, version.into());
        self
    }

    /// Time between scheduled cycles, raised to at least one second.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        if interval < MIN_CHECK_INTERVAL {
            warn!(?interval, "Check interval too short, using {:?}", MIN_CHECK_INTERVAL);
        }
        self.check_interval = interval.max(MIN_CHECK_INTERVAL);
        self
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    pub fn librarian(&self) -> &L {
        &self.librarian
    }

    pub fn selector(&self) -> &CurrentSelector {
        &self.selector
    }

    /// Run one cycle for `binary`, logging any failure.
    pub async fn run_cycle(&self, binary: ManagedBinary) -> CycleOutcome {
        let current_version = self.running.get(&binary).map(String::as_str).unwrap_or("");

        match self.try_cycle(binary, current_version).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_security_relevant() {
                    error!(target: "autoupdate::security", %binary, "Update rejected: {e}");
                } else {
                    warn!(%binary, retryable = e.is_retryable(), "Update cycle failed: {e}");
                }
                CycleOutcome::Failed(e)
            }
        }
    }

    /// Run one cycle for every configured binary.
    ///
    /// Binaries are updated concurrently; outcomes come back in binary order.
    pub async fn run_all(&self) -> Vec<(ManagedBinary, CycleOutcome)> {
        let cycles = self
            .binaries
            .iter()
            .map(|&binary| async move { (binary, self.run_cycle(binary).await) });
        join_all(cycles).await
    }

    async fn try_cycle(&self, binary: ManagedBinary, current_version: &str) -> Result<CycleOutcome> {
        let descriptor = self.metadata.latest_target(binary).await?;
        let target_filename = descriptor.target_filename.as_str();
        debug!(%binary, target_filename, "Latest target");

        if !self.librarian.available(binary, target_filename).await {
            self.librarian
                .add_to_library(binary, current_version, target_filename, &descriptor)
                .await?;
        }

        self.librarian.tidy_library(binary, current_version).await;

        let selected = self.selector.select(binary).await?;
        let previous = self.selector.current(binary).await?.map(|record| record.version);
        if previous.as_ref() == Some(&selected.version) {
            debug!(%binary, version = %selected.version, "Already current");
            return Ok(CycleOutcome::UpToDate {
                version: selected.version,
            });
        }

        self.selector.activate(binary, &selected).await?;
        Ok(CycleOutcome::Activated {
            previous,
            version: selected.version,
        })
    }

    /// Run cycles until `shutdown` turns true or its sender is dropped.
    ///
    /// A cycle runs immediately, then every check interval, and whenever a
    /// trigger arrives. Closing the trigger channel leaves the timer running.
    pub async fn run(&self, mut triggers: mpsc::Receiver<UpdateTrigger>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut triggers_open = true;

        info!(interval = ?self.check_interval, binaries = ?self.binaries, "Updater started");

        while !*shutdown.borrow() {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                trigger = triggers.recv(), if triggers_open => match trigger {
                    Some(UpdateTrigger::CheckNow) => {
                        self.run_all().await;
                    }
                    Some(UpdateTrigger::CheckBinary(binary)) => {
                        self.run_cycle(binary).await;
                    }
                    None => {
                        debug!("Trigger channel closed, continuing on timer");
                        triggers_open = false;
                    }
                },
                _ = ticker.tick() => {
                    self.run_all().await;
                }
            }
        }

        info!("Updater stopped");
    }

    /// Move the updater onto its own task.
    pub fn spawn(self) -> (UpdaterHandle, JoinHandle<()>)
    where
        L: 'static,
        M: 'static,
    {
        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move { self.run(trigger_rx, shutdown_rx).await });
        (
            UpdaterHandle {
                triggers: trigger_tx,
                shutdown: shutdown_tx,
            },
            task,
        )
    }
}
