use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::CommandContext;
use crate::core::ManagedBinary;

/// One line per managed binary: current, newest, pin and count.
#[derive(Args, Debug)]
pub struct StatusCommand {}

impl StatusCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        println!("Library: {}", ctx.store.root().display());

        for binary in ManagedBinary::ALL {
            let records = ctx.store.list(binary).await?;
            let current = ctx.selector().current(binary).await?;

            let current = match current {
                Some(record) => record.version.to_string().green().to_string(),
                None => "unset".dimmed().to_string(),
            };
            let newest = records
                .first()
                .map_or_else(|| "-".to_string(), |record| record.version.to_string());
            let pin = ctx
                .pins
                .get(binary)
                .map_or_else(|| "-".to_string(), |version| version.to_string().yellow().to_string());

            println!(
                "{:<10} current {:<12} newest {:<12} pinned {:<10} installed {}",
                binary.to_string().bold(),
                current,
                newest,
                pin,
                records.len()
            );
        }
        Ok(())
    }
}
