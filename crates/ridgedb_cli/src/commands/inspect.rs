//! Inspect command implementation.

use super::{format_size, open_existing, CliError, Format};
use ridgedb_core::{Config, Decision};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// Size of every data file in bytes.
    pub files: BTreeMap<String, u64>,
    /// Number of committed nodes.
    pub node_count: usize,
    /// Overflow block usage.
    pub blocks: BlockStats,
    /// Recovery log entry counts by decision.
    pub log_entries: BTreeMap<String, usize>,
    /// Transactions still in doubt after recovery.
    pub in_doubt: Vec<InDoubtInfo>,
}

/// Overflow block usage.
#[derive(Debug, Serialize)]
pub struct BlockStats {
    /// Block size in bytes.
    pub block_size: usize,
    /// One past the highest block id.
    pub high_id: u64,
    /// Blocks holding data.
    pub in_use: u64,
    /// Blocks on the free list.
    pub free: usize,
    /// Chains reachable from properties.
    pub chains: usize,
}

/// One in-doubt transaction.
#[derive(Debug, Serialize)]
pub struct InDoubtInfo {
    /// Transaction id.
    pub txid: u64,
    /// Coordinator state.
    pub state: String,
    /// Participants involved.
    pub resources: Vec<String>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: Format) -> Result<(), CliError> {
    let db = open_existing(path, Config::default())?;

    let files = match db.dir() {
        Some(dir) => dir
            .file_sizes()?
            .into_iter()
            .map(|(name, size)| (name.to_string(), size))
            .collect(),
        None => BTreeMap::new(),
    };

    let report = db.verify()?;
    let dynamic = &db.stores().dynamic;
    let blocks = BlockStats {
        block_size: db.config().block_size,
        high_id: dynamic.high_id(),
        in_use: report.blocks_in_use,
        free: report.free_blocks,
        chains: report.chains,
    };

    let mut log_entries = BTreeMap::new();
    for entry in db.transaction_manager().log().entries()? {
        *log_entries.entry(decision_name(entry.decision)).or_insert(0) += 1;
    }

    let in_doubt = db
        .in_doubt()
        .into_iter()
        .map(|info| InDoubtInfo {
            txid: info.txid.as_u64(),
            state: info.state.to_string(),
            resources: info.resources,
        })
        .collect();

    let result = InspectResult {
        path: path.display().to_string(),
        files,
        node_count: db.node_count(),
        blocks,
        log_entries,
        in_doubt,
    };

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

pub(crate) fn decision_name(decision: Decision) -> String {
    format!("{decision:?}")
}

fn print_text_output(result: &InspectResult) {
    println!("RidgeDB Database Inspection");
    println!("===========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Files:");
    for (name, size) in &result.files {
        println!("  {name:<40} {}", format_size(*size));
    }
    println!();
    println!("Nodes: {}", result.node_count);
    println!();
    println!("Overflow blocks ({} bytes each):", result.blocks.block_size);
    println!("  High id: {}", result.blocks.high_id);
    println!("  In use:  {}", result.blocks.in_use);
    println!("  Free:    {}", result.blocks.free);
    println!("  Chains:  {}", result.blocks.chains);
    println!();
    println!("Recovery log:");
    if result.log_entries.is_empty() {
        println!("  (empty)");
    }
    for (decision, count) in &result.log_entries {
        println!("  {decision:<15} {count}");
    }
    if !result.in_doubt.is_empty() {
        println!();
        println!("In doubt:");
        for tx in &result.in_doubt {
            println!("  tx {} ({}) {}", tx.txid, tx.state, tx.resources.join(", "));
        }
    }
}
