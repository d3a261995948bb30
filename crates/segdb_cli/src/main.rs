//! segdb CLI
//!
//! Operator tools for segdb tables.
//!
//! # Commands
//!
//! - `inspect` - Show schema indexes and the segment list
//! - `match` - Run a regex lookup over an index
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// segdb command-line table tools.
#[derive(Parser)]
#[command(name = "segdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the table directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show schema indexes and segments
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Match a regex against a single string-column index
    Match {
        /// Index name or numeric id
        #[arg(short, long)]
        index: String,

        /// Pattern; must match the whole key
        #[arg(long)]
        pattern: String,

        /// Regex flags (i, s, m, x, u, U)
        #[arg(short, long, default_value = "")]
        options: String,

        /// Per-segment memory budget in bytes
        #[arg(short, long)]
        mem_limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
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
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Table path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Match {
            index,
            pattern,
            options,
            mem_limit,
            format,
        } => {
            let path = cli.path.ok_or("Table path required for match")?;
            let request = commands::regex_match::MatchRequest {
                index: &index,
                pattern: &pattern,
                options: &options,
                mem_limit,
            };
            commands::regex_match::run(&path, &request, &format)?;
        }
        Commands::Version => {
            println!("segdb CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("segdb core v{}", segdb_core::VERSION);
        }
    }

    Ok(())
}
