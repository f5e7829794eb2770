use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use super::CommandContext;
use crate::core::ManagedBinary;

/// List installed versions, newest first.
#[derive(Args, Debug)]
pub struct ListCommand {
    /// Binary whose library to list
    binary: ManagedBinary,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct ListEntry {
    version: String,
    target_filename: String,
    installed_at: DateTime<Utc>,
    path: String,
    current: bool,
    pinned: bool,
}

impl ListCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let binary = self.binary;
        let records = ctx
            .store
            .list(binary)
            .await
            .with_context(|| format!("Failed to list {binary} library"))?;
        let current = ctx.store.read_current(binary).await?;
        let pinned = ctx.pins.get(binary);

        let entries: Vec<ListEntry> = records
            .iter()
            .map(|record| ListEntry {
                version: record.version.to_string(),
                target_filename: record.target_filename().to_string(),
                installed_at: record.marker.installed_at,
                path: record.artifact_path.display().to_string(),
                current: current.as_ref() == Some(&record.version),
                pinned: pinned.as_ref() == Some(&record.version),
            })
            .collect();

        if self.json {
            println!("{}", serde_json::to_string_pretty(&entries)?);
            return Ok(());
        }

        if entries.is_empty() {
            println!("No versions of {} installed in {}", binary, ctx.store.library_dir(binary).display());
            return Ok(());
        }

        println!("{}", format!("{binary} ({} installed)", entries.len()).bold());
        for entry in &entries {
            let marker = if entry.current { "*".green().bold() } else { " ".normal() };
            let mut line = format!(
                "{marker} {:<16} {:<40} {}",
                entry.version,
                entry.target_filename,
                entry.installed_at.format("%Y-%m-%d %H:%M:%S")
            );
            if entry.current {
                line.push_str(&format!(" {}", "[current]".green()));
            }
            if entry.pinned {
                line.push_str(&format!(" {}", "[pinned]".yellow()));
            }
            println!("{line}");
        }

        if let Some(pinned) = pinned {
            if !entries.iter().any(|entry| entry.pinned) {
                println!("{} pinned version {pinned} is not installed", "warning:".yellow().bold());
            }
        }
        Ok(())
    }
}
