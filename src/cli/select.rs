use anyhow::Result;
use clap::Args;

use super::CommandContext;
use crate::core::ManagedBinary;

/// Print the version a new process should run, and its executable.
#[derive(Args, Debug)]
pub struct SelectCommand {
    /// Binary to select for
    binary: ManagedBinary,
}

impl SelectCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let record = ctx.selector().select(self.binary).await?;
        println!("{}\t{}", record.version, record.artifact_path.display());
        Ok(())
    }
}
