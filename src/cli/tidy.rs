use anyhow::Result;
use clap::Args;
use colored::Colorize;
use semver::Version;

use super::CommandContext;
use crate::core::ManagedBinary;
use crate::library::Librarian;

/// Prune old versions, keeping the running, pinned and current ones.
#[derive(Args, Debug)]
pub struct TidyCommand {
    /// Binary whose library to tidy
    binary: ManagedBinary,

    /// Version currently running; never removed
    #[arg(long, default_value = "")]
    current: String,
}

impl TidyCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let binary = self.binary;
        let before = installed_versions(ctx, binary).await?;

        ctx.librarian(ctx.mirror()).tidy_library(binary, &self.current).await;

        let after = installed_versions(ctx, binary).await?;
        let removed: Vec<&Version> = before.iter().filter(|version| !after.contains(version)).collect();

        if removed.is_empty() {
            println!("Nothing to remove, {} version(s) of {binary} kept", after.len());
        } else {
            for version in &removed {
                println!("{} {binary} {version}", "removed".red());
            }
            println!("{} version(s) of {binary} kept", after.len());
        }
        Ok(())
    }
}

async fn installed_versions(ctx: &CommandContext, binary: ManagedBinary) -> Result<Vec<Version>> {
    Ok(ctx.store.list(binary).await?.into_iter().map(|record| record.version).collect())
}
