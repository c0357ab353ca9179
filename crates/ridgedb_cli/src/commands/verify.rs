//! Verify command implementation.

use super::{open_existing, CliError};
use ridgedb_core::Config;
use std::path::Path;

/// Runs the verify command.
///
/// Opens the database, which replays every journal and runs recovery, then
/// walks every overflow chain from the property store.
pub fn run(path: &Path) -> Result<(), CliError> {
    println!("Verifying database at {}", path.display());
    println!();

    let db = open_existing(path, Config::default())?;
    let report = db.verify()?;

    println!("Chains walked:   {}", report.chains);
    println!("Blocks in use:   {}", report.blocks_in_use);
    println!("Blocks free:     {}", report.free_blocks);

    for id in &report.orphans {
        println!("  orphan block {id}");
    }
    for id in &report.shared {
        println!("  block {id} is shared between chains");
    }
    for (head, reason) in &report.broken {
        println!("  chain at {head} is broken: {reason}");
    }

    let in_doubt = db.in_doubt();
    if !in_doubt.is_empty() {
        println!();
        println!("{} transaction(s) in doubt", in_doubt.len());
    }

    println!();
    let problems = report.orphans.len() + report.shared.len() + report.broken.len();
    if problems == 0 {
        println!("✓ Database verification passed");
        Ok(())
    } else {
        println!("✗ Database verification failed");
        Err(CliError::Inconsistent(problems))
    }
}
