//! RidgeDB CLI
//!
//! Command-line tools for RidgeDB database maintenance.
//!
//! # Commands
//!
//! - `inspect` - Display file sizes, block usage and recovery log contents
//! - `dump-log` - Print the coordinator recovery log
//! - `verify` - Check overflow chains for orphaned or shared blocks
//! - `recover` - Run startup recovery and report its decisions

mod commands;

use clap::{Parser, Subcommand};
use commands::Format;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// RidgeDB command-line database tools.
#[derive(Parser)]
#[command(name = "ridgedb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database directory
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
    /// Display database statistics
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Print the coordinator recovery log
    DumpLog {
        /// Maximum number of entries to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Verify overflow chain integrity
    Verify,

    /// Run recovery and report what was decided
    Recover {
        /// Skip participants that cannot answer instead of failing
        #[arg(long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let Some(path) = cli.path else {
        eprintln!("error: --path is required");
        return ExitCode::FAILURE;
    };

    let result = match cli.command {
        Commands::Inspect { format } => commands::inspect::run(&path, format),
        Commands::DumpLog { limit, format } => commands::dump_log::run(&path, limit, format),
        Commands::Verify => commands::verify::run(&path),
        Commands::Recover { force } => commands::recover::run(&path, force),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridgedb_core::{GraphDatabase, PropertyValue};
    use tempfile::tempdir;

    fn populated(path: &std::path::Path) {
        let db = GraphDatabase::open(path).unwrap();
        db.transaction(|db, tx| {
            let node = db.create_node(tx)?;
            db.set_property(tx, node.into(), "bio", PropertyValue::String("x".repeat(300)))
        })
        .unwrap();
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["ridgedb", "-p", "db", "dump-log", "--format", "json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::DumpLog {
                limit: None,
                format: Format::Json
            }
        ));
        let cli = Cli::try_parse_from(["ridgedb", "recover", "--force", "--path", "db"]).unwrap();
        assert!(matches!(cli.command, Commands::Recover { force: true }));
    }

    #[test]
    fn commands_run_against_a_database() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("graph.db");
        populated(&path);

        commands::inspect::run(&path, Format::Json).unwrap();
        commands::dump_log::run(&path, Some(10), Format::Text).unwrap();
        commands::verify::run(&path).unwrap();
        commands::recover::run(&path, false).unwrap();
    }

    #[test]
    fn missing_database_is_reported() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("absent");
        assert!(matches!(
            commands::inspect::run(&path, Format::Text),
            Err(commands::CliError::Missing(_))
        ));
        assert!(commands::dump_log::run(&path, None, Format::Text).is_err());
    }
}
