use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Args;
use colored::Colorize;

use super::CommandContext;
use crate::core::ManagedBinary;
use crate::fetch::MirrorFetcher;
use crate::library::Librarian;
use crate::target::{TargetDescriptor, TargetHash};

/// Add a local artifact to the library.
///
/// The artifact's file name is the target filename and must carry the
/// version, e.g. `agent-1.2.0-linux-amd64`. The bytes are checked against
/// `--hash` before anything becomes visible in the library.
#[derive(Args, Debug)]
pub struct InstallCommand {
    /// Binary the artifact belongs to
    binary: ManagedBinary,

    /// Path to the artifact
    artifact: PathBuf,

    /// Expected digest, `sha256:<hex>`, `sha512:<hex>` or bare hex
    #[arg(long)]
    hash: String,

    /// Version currently running, for the install log
    #[arg(long, default_value = "")]
    current: String,

    /// Point the binary at the installed version afterwards
    #[arg(long)]
    activate: bool,
}

impl InstallCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let binary = self.binary;
        let target_filename = self
            .artifact
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("Artifact path {} has no usable file name", self.artifact.display()))?
            .to_string();
        let metadata = tokio::fs::metadata(&self.artifact)
            .await
            .with_context(|| format!("Cannot read artifact {}", self.artifact.display()))?;
        let hash: TargetHash = self.hash.parse().context("Invalid --hash")?;
        let descriptor = TargetDescriptor::new(binary, &target_filename, hash, metadata.len());

        let mirror_dir = match self.artifact.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let librarian = ctx.librarian(MirrorFetcher::new(mirror_dir));

        if librarian.available(binary, &target_filename).await {
            println!("{} {target_filename} is already installed", "✓".green());
        } else {
            librarian
                .add_to_library(binary, &self.current, &target_filename, &descriptor)
                .await
                .with_context(|| format!("Failed to install {target_filename}"))?;
            println!("{} Installed {}", "✓".green().bold(), target_filename.bold());
        }

        if self.activate {
            let record = librarian
                .installed_record(binary, &target_filename)
                .await?
                .ok_or_else(|| anyhow!("{target_filename} disappeared from the library"))?;
            ctx.selector().activate(binary, &record).await?;
            println!("{} {binary} now runs {}", "✓".green().bold(), record.version.to_string().bold());
        }
        Ok(())
    }
}
