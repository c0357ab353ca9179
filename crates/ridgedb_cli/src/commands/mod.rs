//! CLI command implementations.

pub mod dump_log;
pub mod inspect;
pub mod recover;
pub mod verify;

use ridgedb_core::{Config, CoreError, GraphDatabase};
use std::path::Path;
use thiserror::Error;

/// Errors reported by the commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The database refused an operation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A file could not be read.
    #[error(transparent)]
    Storage(#[from] ridgedb_storage::StorageError),

    /// JSON output could not be produced.
    #[error("cannot format output: {0}")]
    Json(#[from] serde_json::Error),

    /// No database lives at the given path.
    #[error("no database found at {0}")]
    Missing(String),

    /// Verification found problems.
    #[error("verification failed with {0} problem(s)")]
    Inconsistent(usize),
}

/// Output format shared by the reporting commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Opens an existing database, running recovery.
pub(crate) fn open_existing(path: &Path, config: Config) -> Result<GraphDatabase, CliError> {
    if !path.is_dir() {
        return Err(CliError::Missing(path.display().to_string()));
    }
    Ok(GraphDatabase::open_with_config(
        path,
        config.create_if_missing(false),
    )?)
}

pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
