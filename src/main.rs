//! Operator entry point for the autoupdate library.

use agent_autoupdate::cli;
use anyhow::Result;
use clap::Parser;
use colored::Colorize;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("{}: {e:#}", "error".red().bold());
            std::process::exit(1);
        }
    }
}
