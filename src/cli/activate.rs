use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::{CommandContext, parse_version_arg};
use crate::core::{ManagedBinary, UpdateError};

/// Point a binary at an installed version.
///
/// Without a version the selector's choice is activated. The running process
/// is not restarted.
#[derive(Args, Debug)]
pub struct ActivateCommand {
    /// Binary to switch
    binary: ManagedBinary,

    /// Installed version to activate
    version: Option<String>,
}

impl ActivateCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let binary = self.binary;
        let selector = ctx.selector();

        let record = match &self.version {
            Some(raw) => {
                let version = parse_version_arg(raw)?;
                ctx.store.get(binary, &version).await?.ok_or(UpdateError::NotFound {
                    binary,
                    version: version.to_string(),
                })?
            }
            None => selector.select(binary).await?,
        };

        let previous = ctx.store.read_current(binary).await?;
        selector.activate(binary, &record).await?;

        match previous {
            Some(previous) if previous == record.version => {
                println!("{binary} already points at {}", record.version);
            }
            Some(previous) => println!(
                "{} {binary} {} -> {}",
                "✓".green().bold(),
                previous,
                record.version.to_string().bold()
            ),
            None => println!("{} {binary} -> {}", "✓".green().bold(), record.version.to_string().bold()),
        }
        Ok(())
    }
}
