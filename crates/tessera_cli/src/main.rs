//! Tessera CLI
//!
//! Command-line tools for exercising and checking Tessera databases.
//!
//! # Commands
//!
//! - `scenario` - Import, delete and compact a table, then report segments
//! - `verify` - Verify every block in a block file
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tessera_core::{Config, DEFAULT_BLOCK_CAPACITY, DEFAULT_SEGMENT_CAPACITY};
use tracing_subscriber::EnvFilter;

/// Tessera command-line database tools.
#[derive(Parser)]
#[command(name = "tessera")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database directory (in-memory if omitted)
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Rows per stored block
    #[arg(global = true, long, default_value_t = DEFAULT_BLOCK_CAPACITY)]
    block_capacity: usize,

    /// Rows per segment
    #[arg(global = true, long, default_value_t = DEFAULT_SEGMENT_CAPACITY)]
    segment_capacity: usize,

    #[command(subcommand)]
    command: Commands,
}

/// Output format of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

/// How the scenario compacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CompactMode {
    /// Every active segment
    All,
    /// Whatever the compaction policy picks
    Auto,
    /// Skip compaction
    None,
}

#[derive(Subcommand)]
enum Commands {
    /// Import, delete and compact a table, then report its segments
    Scenario {
        /// Number of import transactions
        #[arg(short, long, default_value_t = 111)]
        imports: usize,

        /// Rows per import
        #[arg(short, long, default_value_t = DEFAULT_BLOCK_CAPACITY)]
        rows: usize,

        /// Delete every Nth row before compacting (0 deletes nothing)
        #[arg(long, default_value_t = 0)]
        delete_every: usize,

        /// Delete every Nth row while the compaction runs (0 deletes nothing)
        #[arg(long, default_value_t = 0)]
        delete_during: usize,

        /// Which segments to compact
        #[arg(short, long, value_enum, default_value_t = CompactMode::All)]
        compact: CompactMode,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Verify every block in the block file
    Verify {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::new()
        .block_capacity(cli.block_capacity)
        .segment_capacity(cli.segment_capacity);

    match cli.command {
        Commands::Scenario {
            imports,
            rows,
            delete_every,
            delete_during,
            compact,
            format,
        } => {
            let options = commands::scenario::ScenarioOptions {
                imports,
                rows,
                delete_every,
                delete_during,
                compact: match compact {
                    CompactMode::All => commands::scenario::Compaction::All,
                    CompactMode::Auto => commands::scenario::Compaction::Auto,
                    CompactMode::None => commands::scenario::Compaction::Skip,
                },
            };
            let report = commands::scenario::run(cli.path.as_deref(), config, &options)?;
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                Format::Text => commands::scenario::print_text(&report),
            }
        }
        Commands::Verify { format } => {
            let path = cli.path.ok_or("Database path required for verify")?;
            let result = commands::verify::run(&path)?;
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
                Format::Text => commands::verify::print_text(&path, &result),
            }
            if !result.is_ok() {
                return Err("Verification failed".into());
            }
        }
        Commands::Version => {
            println!("Tessera CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
