//! Confab Command-Line Interface
//!
//! Drives the conversation core without a GUI: generates PINs, runs a
//! simulated conversation between two local parties, and shows the
//! persisted trust table.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// Confab - verified, store-and-forward conversations
#[derive(Parser)]
#[command(name = "confab")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Data directory path
    #[arg(short, long, default_value = "~/.confab")]
    data_dir: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a fresh verification PIN
    Pin,

    /// Run a verification and delayed delivery between two local parties
    Simulate {
        /// Answer with a wrong PIN
        #[arg(long)]
        mismatch: bool,

        /// Number of messages sent before the peer can receive them
        #[arg(long, default_value = "2")]
        delayed: usize,
    },

    /// Show the persisted trust table
    Trust,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Expand data directory
    let data_dir = shellexpand::tilde(&cli.data_dir).to_string();

    let command = cli.command.unwrap_or(Commands::Trust);

    match command {
        Commands::Pin => {
            commands::print_pin().await?;
        }
        Commands::Simulate { mismatch, delayed } => {
            commands::simulate(&data_dir, mismatch, delayed).await?;
        }
        Commands::Trust => {
            commands::show_trust(&data_dir).await?;
        }
    }

    Ok(())
}
