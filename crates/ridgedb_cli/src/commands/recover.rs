//! Recover command implementation.

use super::{open_existing, CliError};
use ridgedb_core::Config;
use std::path::Path;
use tracing::warn;

/// Runs startup recovery and prints what it decided.
///
/// With `force`, participants that cannot answer are skipped and their
/// transactions stay in doubt instead of failing the open.
pub fn run(path: &Path, force: bool) -> Result<(), CliError> {
    let db = open_existing(path, Config::default().force_recovery(force))?;
    let report = db.recovery_report();

    if report.is_empty() {
        println!("Nothing to recover");
        return Ok(());
    }
    for xid in &report.committed {
        println!("committed   {xid}");
    }
    for xid in &report.rolled_back {
        println!("rolled back {xid}");
    }
    for txid in &report.in_doubt {
        println!("in doubt    {txid}");
    }
    for name in &report.skipped {
        warn!(resource = %name, "participant skipped");
        println!("skipped     {name}");
    }
    Ok(())
}
