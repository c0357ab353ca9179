//! Dump-log command implementation.

use super::inspect::decision_name;
use super::{CliError, Format};
use ridgedb_core::{txlog::read_entries, LogEntry, TX_LOG_FILE};
use ridgedb_storage::FileBackend;
use serde::Serialize;
use std::path::Path;

/// Recovery log entry representation for output.
#[derive(Debug, Serialize)]
pub struct LogEntryInfo {
    /// Position in the log.
    pub index: usize,
    /// Transaction id.
    pub txid: u64,
    /// Branch number within the transaction.
    pub branch: u32,
    /// Participant name.
    pub resource: String,
    /// Recorded decision.
    pub decision: String,
}

impl LogEntryInfo {
    fn new(index: usize, entry: &LogEntry) -> Self {
        Self {
            index,
            txid: entry.xid.global.as_u64(),
            branch: entry.xid.branch,
            resource: entry.resource.clone(),
            decision: decision_name(entry.decision),
        }
    }
}

/// Runs the dump-log command.
///
/// Reads the log file directly, so it works on a database another process
/// holds open and never triggers recovery.
pub fn run(path: &Path, limit: Option<usize>, format: Format) -> Result<(), CliError> {
    let log_path = path.join(TX_LOG_FILE);
    if !log_path.is_file() {
        return Err(CliError::Missing(log_path.display().to_string()));
    }

    let backend = FileBackend::open_read_only(&log_path)?;
    let entries: Vec<LogEntryInfo> = read_entries(&backend)?
        .iter()
        .take(limit.unwrap_or(usize::MAX))
        .enumerate()
        .map(|(i, entry)| LogEntryInfo::new(i, entry))
        .collect();

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        Format::Text => print_text_output(&entries),
    }
    Ok(())
}

fn print_text_output(entries: &[LogEntryInfo]) {
    if entries.is_empty() {
        println!("Recovery log is empty");
        return;
    }
    println!("{:>6}  {:>8}  {:>6}  {:<36}  DECISION", "#", "TX", "BRANCH", "RESOURCE");
    for e in entries {
        println!(
            "{:>6}  {:>8}  {:>6}  {:<36}  {}",
            e.index, e.txid, e.branch, e.resource, e.decision
        );
    }
    println!();
    println!("Total: {} entries", entries.len());
}
