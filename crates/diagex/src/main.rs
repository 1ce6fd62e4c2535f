//! diagex CLI - batch Mermaid diagram export.
//!
//! Provides commands for:
//! - `scan`: List diagram sources with their types and complexity
//! - `export`: Render every diagram to one or more formats
//! - `check`: Report which rendering backend would be used

mod commands;
mod error;
mod output;
mod preferences;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::{CheckArgs, ExportArgs, ScanArgs};
use error::CliError;
use output::Output;

/// Application version from Cargo.toml.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// diagex - find Mermaid diagrams and export them in bulk.
#[derive(Parser)]
#[command(name = "diagex", version, about)]
struct Cli {
    /// Enable verbose output (info-level logs).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List diagram sources under a directory.
    Scan(ScanArgs),
    /// Export every diagram under a directory.
    Export(ExportArgs),
    /// Check renderer availability.
    Check(CheckArgs),
}

fn main() {
    let cli = Cli::parse();
    let output = Output::new();

    // --verbose enables INFO level, otherwise use RUST_LOG or default to WARN
    let filter = if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli.command) {
        output.error(&format!("Error: {err}"));
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Scan(args) => args.execute(VERSION),
        Commands::Export(args) => args.execute(VERSION),
        Commands::Check(args) => runtime()?.block_on(args.execute()),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, CliError> {
    tokio::runtime::Runtime::new().map_err(CliError::Io)
}
