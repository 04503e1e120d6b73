//! TradeSync CLI
//!
//! Command-line tools for the offline data of a TradeSync client.
//!
//! # Commands
//!
//! - `inspect` - Show queue length and pending operations
//! - `dead-letters` - List operations that were given up
//! - `clear` - Discard pending operations (and optionally dead letters)

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// TradeSync offline data tools.
#[derive(Parser)]
#[command(name = "tradesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the offline data directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Storage namespace of the engine
    #[arg(global = true, short, long, default_value = "tradesync")]
    namespace: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show queue length and pending operations
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List dead-lettered operations
    DeadLetters {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Discard all pending operations
    Clear {
        /// Also discard dead letters
        #[arg(short, long)]
        dead_letters: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Data path required for inspect")?;
            commands::inspect::run(&path, &cli.namespace, &format)?;
        }
        Commands::DeadLetters { format } => {
            let path = cli.path.ok_or("Data path required for dead-letters")?;
            commands::dead_letters::run(&path, &cli.namespace, &format)?;
        }
        Commands::Clear { dead_letters } => {
            let path = cli.path.ok_or("Data path required for clear")?;
            commands::clear::run(&path, &cli.namespace, dead_letters)?;
        }
        Commands::Version => {
            println!("TradeSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Client: {}", tradesync_engine::default_client_info());
            println!("Queue format v{}", tradesync_engine::FORMAT_VERSION);
        }
    }

    Ok(())
}
