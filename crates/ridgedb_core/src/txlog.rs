//! The coordinator's recovery log.
//!
//! Every two-phase decision is appended as `(transaction, branch, resource,
//! decision)` in the order it happened. On startup the log is folded into
//! one [`TxSummary`] per transaction, which tells recovery whether the
//! transaction had reached the point where commit was decided.
//!
//! One-phase commits are not logged here: the single participant's own
//! journal is authoritative for them.

use crate::error::{CoreError, CoreResult};
use crate::log::{put_short_str, FrameLog, LogRecord, PayloadReader};
use crate::types::{TransactionId, Xid};
use parking_lot::Mutex;
use ridgedb_storage::StorageBackend;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Outcome recorded for one branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Decision {
    /// The branch takes part in a two-phase commit.
    Enlisted = 1,
    /// The branch voted to commit and is durably prepared.
    Prepared = 2,
    /// The branch made no changes and needs no second phase.
    ReadOnly = 3,
    /// The branch committed.
    Committed = 4,
    /// The branch rolled back.
    RolledBack = 5,
    /// The branch failed after commit was decided.
    HeuristicMixed = 6,
    /// The heuristic outcome was acknowledged.
    Forgotten = 7,
}

impl Decision {
    /// Converts a byte to a decision.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Enlisted),
            2 => Some(Self::Prepared),
            3 => Some(Self::ReadOnly),
            4 => Some(Self::Committed),
            5 => Some(Self::RolledBack),
            6 => Some(Self::HeuristicMixed),
            7 => Some(Self::Forgotten),
            _ => None,
        }
    }

    /// Converts the decision to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Lowercase name for diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Enlisted => "enlisted",
            Self::Prepared => "prepared",
            Self::ReadOnly => "read_only",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
            Self::HeuristicMixed => "heuristic_mixed",
            Self::Forgotten => "forgotten",
        }
    }
}

/// One recovery log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// The branch the decision applies to.
    pub xid: Xid,
    /// Stable name of the participant.
    pub resource: String,
    /// What happened.
    pub decision: Decision,
}

impl LogEntry {
    /// Creates an entry.
    pub fn new(xid: Xid, resource: impl Into<String>, decision: Decision) -> Self {
        Self {
            xid,
            resource: resource.into(),
            decision,
        }
    }
}

impl LogRecord for LogEntry {
    const MAGIC: [u8; 4] = *b"RTXL";
    const KIND: &'static str = "recovery log";

    fn type_byte(&self) -> u8 {
        self.decision.as_byte()
    }

    fn encode_payload(&self, buf: &mut Vec<u8>) {
        self.xid.encode(buf);
        put_short_str(buf, &self.resource);
    }

    fn decode_payload(type_byte: u8, payload: &[u8]) -> CoreResult<Self> {
        let decision = Decision::from_byte(type_byte).ok_or_else(|| {
            CoreError::log_corruption(format!("unknown recovery log decision: {type_byte}"))
        })?;
        let mut r = PayloadReader::new(payload);
        let xid = r.xid()?;
        let resource = r.short_str()?;
        r.finish(decision.name())?;
        Ok(Self {
            xid,
            resource,
            decision,
        })
    }
}

/// What the log knows about one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxSummary {
    /// Enlisted branches in enlistment order.
    pub enlisted: Vec<(String, Xid)>,
    /// Participants that voted to commit.
    pub prepared: BTreeSet<String>,
    /// Participants that voted read-only.
    pub read_only: BTreeSet<String>,
    /// Participants that committed.
    pub committed: BTreeSet<String>,
    /// Participants that rolled back.
    pub rolled_back: BTreeSet<String>,
    /// Participants whose commit failed after the decision and that have
    /// not committed since.
    pub heuristic: BTreeSet<String>,
    /// Participants that acknowledged a forget.
    pub forgotten: BTreeSet<String>,
}

impl TxSummary {
    /// Folds one entry into the summary.
    pub fn record(&mut self, entry: &LogEntry) {
        let name = entry.resource.clone();
        match entry.decision {
            Decision::Enlisted => {
                if !self.enlisted.iter().any(|(n, _)| *n == name) {
                    self.enlisted.push((name, entry.xid));
                }
            }
            Decision::Prepared => {
                self.prepared.insert(name);
            }
            Decision::ReadOnly => {
                self.read_only.insert(name);
            }
            Decision::Committed => {
                self.heuristic.remove(&name);
                self.committed.insert(name);
            }
            Decision::RolledBack => {
                self.rolled_back.insert(name);
            }
            Decision::HeuristicMixed => {
                self.heuristic.insert(name);
            }
            Decision::Forgotten => {
                self.forgotten.insert(name);
            }
        }
    }

    /// Whether every enlisted participant voted to commit or read-only.
    ///
    /// This is the point where commit is decided.
    #[must_use]
    pub fn all_prepared(&self) -> bool {
        !self.enlisted.is_empty()
            && self
                .enlisted
                .iter()
                .all(|(n, _)| self.prepared.contains(n) || self.read_only.contains(n))
    }

    /// Whether `resource` has reached a final outcome.
    #[must_use]
    pub fn is_settled(&self, resource: &str) -> bool {
        self.committed.contains(resource)
            || self.rolled_back.contains(resource)
            || self.read_only.contains(resource)
            || self.forgotten.contains(resource)
    }

    /// Whether nothing more needs to happen for this transaction.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.enlisted.iter().all(|(n, _)| self.is_settled(n))
    }

    /// Whether a heuristic outcome is still waiting to be acknowledged.
    #[must_use]
    pub fn is_heuristic(&self) -> bool {
        self.heuristic.iter().any(|n| !self.forgotten.contains(n))
    }
}

/// Folds log entries into one summary per transaction.
#[must_use]
pub fn summarize(entries: &[LogEntry]) -> BTreeMap<TransactionId, TxSummary> {
    let mut map: BTreeMap<TransactionId, TxSummary> = BTreeMap::new();
    for entry in entries {
        map.entry(entry.xid.global).or_default().record(entry);
    }
    map
}

struct LogState {
    frames: FrameLog,
    summaries: BTreeMap<TransactionId, TxSummary>,
}

/// Append-only, single-writer decision log.
///
/// Keeps a summary of every transaction written since the last rotation
/// so the coordinator can tell when the log may be truncated.
pub struct RecoveryLog {
    state: Mutex<LogState>,
    max_size: u64,
}

impl RecoveryLog {
    /// Opens the log and replays it.
    ///
    /// # Errors
    ///
    /// Returns an error if the log is corrupted.
    pub fn open(
        backend: Box<dyn StorageBackend>,
        sync_on_write: bool,
        max_size: u64,
    ) -> CoreResult<Self> {
        let mut frames = FrameLog::new(backend, sync_on_write);
        let entries: Vec<LogEntry> = frames.replay()?;
        let summaries = summarize(&entries);
        Ok(Self {
            state: Mutex::new(LogState { frames, summaries }),
            max_size,
        })
    }

    /// Appends entries and flushes them before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or flush fails.
    pub fn append(&self, entries: &[LogEntry]) -> CoreResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock();
        state.frames.append_all(entries)?;
        state.frames.flush()?;
        for entry in entries {
            state
                .summaries
                .entry(entry.xid.global)
                .or_default()
                .record(entry);
        }
        Ok(())
    }

    /// Returns the summary of one transaction.
    #[must_use]
    pub fn summary(&self, txid: TransactionId) -> Option<TxSummary> {
        self.state.lock().summaries.get(&txid).cloned()
    }

    /// Returns every transaction the log has not seen resolved.
    #[must_use]
    pub fn unresolved(&self) -> BTreeMap<TransactionId, TxSummary> {
        self.state
            .lock()
            .summaries
            .iter()
            .filter(|(_, s)| !s.is_resolved())
            .map(|(id, s)| (*id, s.clone()))
            .collect()
    }

    /// Highest transaction id mentioned since the last rotation.
    #[must_use]
    pub fn highest_txid(&self) -> Option<TransactionId> {
        self.state.lock().summaries.keys().next_back().copied()
    }

    /// Reads every entry currently in the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the log is corrupted.
    pub fn entries(&self) -> CoreResult<Vec<LogEntry>> {
        let state = self.state.lock();
        state
            .frames
            .iter::<LogEntry>()?
            .map(|r| r.map(|(_, e)| e))
            .collect()
    }

    /// Current size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub fn size(&self) -> CoreResult<u64> {
        self.state.lock().frames.size()
    }

    /// Truncates the log when it is over its size limit and every
    /// transaction in it is resolved.
    ///
    /// `busy` is consulted under the log lock; rotation is skipped while
    /// it reports work the log does not yet know about.
    ///
    /// Returns whether the log was truncated.
    ///
    /// # Errors
    ///
    /// Returns an error if truncation fails.
    pub fn rotate_if_idle(&self, busy: impl FnOnce() -> bool) -> CoreResult<bool> {
        let mut state = self.state.lock();
        let size = state.frames.size()?;
        if size <= self.max_size || state.summaries.values().any(|s| !s.is_resolved()) || busy() {
            return Ok(false);
        }
        state.frames.clear()?;
        state.summaries.clear();
        info!(previous_size = size, "recovery log rotated");
        Ok(true)
    }
}

impl std::fmt::Debug for RecoveryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryLog")
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

/// Reads the entries of a recovery log without opening it for writing.
///
/// # Errors
///
/// Returns an error if the log is corrupted.
pub fn read_entries(backend: &dyn StorageBackend) -> CoreResult<Vec<LogEntry>> {
    crate::log::FrameIterator::<LogEntry>::new(backend)?
        .map(|r| r.map(|(_, e)| e))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridgedb_storage::InMemoryBackend;

    fn xid(tx: u64, branch: u32) -> Xid {
        Xid::new(TransactionId::new(tx), branch)
    }

    fn open(backend: &InMemoryBackend, max: u64) -> RecoveryLog {
        RecoveryLog::open(Box::new(backend.clone()), false, max).unwrap()
    }

    #[test]
    fn entries_survive_reopen() {
        let backend = InMemoryBackend::new();
        let log = open(&backend, u64::MAX);
        log.append(&[
            LogEntry::new(xid(1, 0), "nodes", Decision::Enlisted),
            LogEntry::new(xid(1, 1), "props", Decision::Enlisted),
            LogEntry::new(xid(1, 0), "nodes", Decision::Prepared),
        ])
        .unwrap();
        drop(log);

        let log = open(&backend, u64::MAX);
        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].decision, Decision::Prepared);

        let summary = log.summary(TransactionId::new(1)).unwrap();
        assert!(!summary.all_prepared());
        assert!(!summary.is_resolved());
        assert_eq!(log.unresolved().len(), 1);
        assert_eq!(log.highest_txid(), Some(TransactionId::new(1)));
    }

    #[test]
    fn summary_decides_commit_once_all_voted() {
        let mut s = TxSummary::default();
        s.record(&LogEntry::new(xid(2, 0), "a", Decision::Enlisted));
        s.record(&LogEntry::new(xid(2, 1), "b", Decision::Enlisted));
        s.record(&LogEntry::new(xid(2, 0), "a", Decision::Prepared));
        assert!(!s.all_prepared());
        s.record(&LogEntry::new(xid(2, 1), "b", Decision::ReadOnly));
        assert!(s.all_prepared());
        assert!(!s.is_resolved());
        s.record(&LogEntry::new(xid(2, 0), "a", Decision::Committed));
        assert!(s.is_resolved());
    }

    #[test]
    fn heuristic_stays_unresolved_until_forgotten() {
        let mut s = TxSummary::default();
        s.record(&LogEntry::new(xid(3, 0), "a", Decision::Enlisted));
        s.record(&LogEntry::new(xid(3, 0), "a", Decision::Prepared));
        s.record(&LogEntry::new(xid(3, 0), "a", Decision::HeuristicMixed));
        assert!(s.is_heuristic());
        assert!(!s.is_resolved());
        s.record(&LogEntry::new(xid(3, 0), "a", Decision::Forgotten));
        assert!(s.is_resolved());
        assert!(!s.is_heuristic());
    }

    #[test]
    fn forget_resolves_only_the_participants_that_acknowledged() {
        let mut s = TxSummary::default();
        for (branch, name) in [(0, "a"), (1, "b")] {
            s.record(&LogEntry::new(xid(5, branch), name, Decision::Enlisted));
            s.record(&LogEntry::new(xid(5, branch), name, Decision::Prepared));
        }
        s.record(&LogEntry::new(xid(5, 0), "a", Decision::Committed));
        s.record(&LogEntry::new(xid(5, 1), "b", Decision::HeuristicMixed));
        s.record(&LogEntry::new(xid(5, 0), "a", Decision::Forgotten));
        assert!(s.is_heuristic());
        assert!(!s.is_resolved());

        s.record(&LogEntry::new(xid(5, 1), "b", Decision::Forgotten));
        assert!(!s.is_heuristic());
        assert!(s.is_resolved());
    }

    #[test]
    fn rotation_keeps_a_partly_forgotten_transaction() {
        let log = open(&InMemoryBackend::new(), 1);
        log.append(&[
            LogEntry::new(xid(6, 0), "a", Decision::Enlisted),
            LogEntry::new(xid(6, 1), "b", Decision::Enlisted),
            LogEntry::new(xid(6, 0), "a", Decision::Prepared),
            LogEntry::new(xid(6, 1), "b", Decision::Prepared),
            LogEntry::new(xid(6, 0), "a", Decision::Committed),
            LogEntry::new(xid(6, 1), "b", Decision::HeuristicMixed),
            LogEntry::new(xid(6, 0), "a", Decision::Forgotten),
        ])
        .unwrap();
        assert!(!log.rotate_if_idle(|| false).unwrap());
        assert!(log.summary(TransactionId::new(6)).unwrap().all_prepared());
    }

    #[test]
    fn empty_summary_never_decides_commit() {
        assert!(!TxSummary::default().all_prepared());
    }

    #[test]
    fn rotation_waits_for_resolution() {
        let backend = InMemoryBackend::new();
        let log = open(&backend, 1);
        log.append(&[
            LogEntry::new(xid(1, 0), "a", Decision::Enlisted),
            LogEntry::new(xid(1, 0), "a", Decision::Prepared),
        ])
        .unwrap();
        assert!(!log.rotate_if_idle(|| false).unwrap());

        log.append(&[LogEntry::new(xid(1, 0), "a", Decision::Committed)])
            .unwrap();
        assert!(!log.rotate_if_idle(|| true).unwrap());
        assert!(log.rotate_if_idle(|| false).unwrap());
        assert_eq!(log.size().unwrap(), 0);
        assert!(log.unresolved().is_empty());
    }

    #[test]
    fn read_entries_without_opening() {
        let backend = InMemoryBackend::new();
        open(&backend, u64::MAX)
            .append(&[LogEntry::new(xid(4, 0), "a", Decision::RolledBack)])
            .unwrap();
        let entries = read_entries(&backend).unwrap();
        assert_eq!(
            entries,
            vec![LogEntry::new(xid(4, 0), "a", Decision::RolledBack)]
        );
    }
}
