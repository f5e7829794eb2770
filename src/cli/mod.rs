//! Operator command line for inspecting and driving the library.
//!
//! The updater loop normally runs inside the agent; this surface exists for
//! operators and support engineers who need to see what is installed, side-load
//! an artifact, or force a switch-over by hand.
//!
//! # Commands
//!
//! - `list <binary>` - installed versions, with current and pinned marked
//! - `install <binary> <artifact> --hash <hash>` - verify and add an artifact
//! - `tidy <binary>` - prune old versions
//! - `select <binary>` - show which version would run
//! - `activate <binary> [version]` - move the current pointer
//! - `status` - one line per managed binary
//!
//! # Global options
//!
//! - `--config <PATH>` - configuration file (default: platform config dir)
//! - `--root <DIR>` - library root, also read from `AUTOUPDATE_ROOT`
//! - `--verbose` / `--quiet` - log level; `RUST_LOG` applies otherwise
//!
//! ```bash
//! autoupdate --root /var/lib/agent/library list agent
//! autoupdate install agent ./agent-1.2.0-amd64 --hash sha256:ab12...
//! autoupdate activate agent 1.2.0
//! ```

mod activate;
mod install;
mod list;
mod select;
mod status;
mod tidy;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use semver::Version;
use tracing_subscriber::EnvFilter;

use crate::config::AutoupdateConfig;
use crate::constants::ROOT_DIR_ENV;
use crate::fetch::{ArtifactFetcher, MirrorFetcher};
use crate::library::LibraryManager;
use crate::pin::PinRegistry;
use crate::selector::CurrentSelector;
use crate::store::VersionStore;

pub use activate::ActivateCommand;
pub use install::InstallCommand;
pub use list::ListCommand;
pub use select::SelectCommand;
pub use status::StatusCommand;
pub use tidy::TidyCommand;

/// Top-level command line.
#[derive(Parser, Debug)]
#[command(
    name = "autoupdate",
    about = "Manage the verified binary library of a self-updating agent",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the configuration file.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Library root, overriding the configuration file.
    #[arg(long, global = true, value_name = "DIR", env = ROOT_DIR_ENV)]
    root: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List installed versions of a binary.
    List(ListCommand),

    /// Verify an artifact against its hash and add it to the library.
    Install(InstallCommand),

    /// Remove old versions according to the retention policy.
    Tidy(TidyCommand),

    /// Show the version that should be running.
    Select(SelectCommand),

    /// Point a binary at an installed version.
    Activate(ActivateCommand),

    /// Summarize every managed binary.
    Status(StatusCommand),
}

impl Cli {
    /// Install logging, load configuration and run the chosen command.
    pub async fn execute(self) -> Result<()> {
        self.init_logging();

        let ctx = CommandContext::load(self.config.as_deref(), self.root.clone()).await?;
        match self.command {
            Commands::List(cmd) => cmd.execute(&ctx).await,
            Commands::Install(cmd) => cmd.execute(&ctx).await,
            Commands::Tidy(cmd) => cmd.execute(&ctx).await,
            Commands::Select(cmd) => cmd.execute(&ctx).await,
            Commands::Activate(cmd) => cmd.execute(&ctx).await,
            Commands::Status(cmd) => cmd.execute(&ctx).await,
        }
    }

    fn init_logging(&self) {
        let filter = if self.verbose {
            EnvFilter::new("debug")
        } else if self.quiet {
            EnvFilter::new("error")
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }
}

/// Everything a command needs, built once from configuration and flags.
pub struct CommandContext {
    pub config: AutoupdateConfig,
    pub store: VersionStore,
    pub pins: Arc<PinRegistry>,
}

impl CommandContext {
    /// Load configuration and open the library at the resolved root.
    ///
    /// `root` wins over the configured root.
    pub async fn load(config_path: Option<&Path>, root: Option<PathBuf>) -> Result<Self> {
        let config = AutoupdateConfig::load_or_default(config_path).await?;
        let root = match root {
            Some(root) => root,
            None => config.root_dir()?,
        };
        tracing::debug!("Using library root {}", root.display());

        let pins = config.pin_registry().context("Invalid pins in configuration")?;
        Ok(Self {
            store: VersionStore::new(root),
            pins: Arc::new(pins),
            config,
        })
    }

    pub fn selector(&self) -> CurrentSelector {
        CurrentSelector::new(self.store.clone(), self.pins.clone())
    }

    /// A librarian over this library using `fetcher`.
    pub fn librarian<F: ArtifactFetcher>(&self, fetcher: F) -> LibraryManager<F> {
        LibraryManager::new(self.store.clone(), fetcher, self.pins.clone())
            .with_versions_to_keep(self.config.versions_to_keep)
            .with_fetch_timeout(self.config.fetch_timeout())
    }

    /// The configured mirror, or the library root when none is set.
    pub fn mirror(&self) -> MirrorFetcher {
        let dir = self.config.mirror_dir.clone().unwrap_or_else(|| self.store.root().to_path_buf());
        MirrorFetcher::new(dir)
    }
}

/// Parse a version argument, accepting a leading `v`.
pub(crate) fn parse_version_arg(raw: &str) -> Result<Version> {
    Version::parse(raw.trim().trim_start_matches('v'))
        .with_context(|| format!("'{raw}' is not a semantic version"))
}
