//! Journal-backed participants.
//!
//! A [`JournaledResource`] turns any [`StoreState`] into a two-phase
//! participant. Changes staged under a branch stay in memory until
//! prepare, which writes them to the participant's journal:
//!
//! ```text
//! prepare          → Prepare { xid, changes }
//! commit           → Commit { xid }
//! one-phase commit → OnePhaseCommit { xid, changes }
//! rollback         → Rollback { xid }   (only after a prepare)
//! compaction       → Checkpoint { xid, changes } + Prepare per in-doubt branch
//! ```
//!
//! Opening replays the journal: committed branches are applied in journal
//! order and prepared branches without an outcome come back in doubt.
//! A checkpoint always comes first; its changes rebuild the committed state
//! and its xid names the newest transaction it settled.

use crate::error::{CoreError, CoreResult};
use crate::log::{put_bytes, FrameLog, LogRecord, PayloadReader};
use crate::resource::{EndFlags, RecoverFlags, ResourceManager, StartFlags, Vote};
use crate::types::{TransactionId, Xid};
use parking_lot::Mutex;
use ridgedb_storage::StorageBackend;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, info, warn};

/// Resolved branches remembered for duplicate-delivery detection.
const RESOLVED_HISTORY: usize = 4096;

/// The data a journaled participant manages.
pub trait StoreState: Send + 'static {
    /// One staged mutation.
    type Change: Clone + Send + fmt::Debug;

    /// Appends the encoding of one change.
    fn encode_change(change: &Self::Change, buf: &mut Vec<u8>);

    /// Reads one change written by [`encode_change`](Self::encode_change).
    ///
    /// # Errors
    ///
    /// Returns `LogCorruption` for malformed input.
    fn decode_change(reader: &mut PayloadReader<'_>) -> CoreResult<Self::Change>;

    /// Validates a branch at prepare time.
    ///
    /// Anything that could make [`apply`](Self::apply) fail for a logical
    /// reason must be rejected here.
    ///
    /// # Errors
    ///
    /// The error vetoes the transaction.
    fn check(&self, _xid: Xid, _changes: &[Self::Change]) -> CoreResult<()> {
        Ok(())
    }

    /// Applies committed changes.
    ///
    /// Must be idempotent: replay applies journaled commits again.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage fails.
    fn apply(&mut self, changes: &[Self::Change]) -> CoreResult<()>;

    /// Called when a branch rolls back.
    fn discard(&mut self, _changes: &[Self::Change]) {}

    /// Called on open for each branch that is still in doubt.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot hold the branch's resources.
    fn restore_in_doubt(&mut self, _changes: &[Self::Change]) -> CoreResult<()> {
        Ok(())
    }

    /// Changes that rebuild the committed state when applied to a fresh
    /// state.
    ///
    /// Compaction journals these in place of the history they summarize,
    /// so everything the history made durable must be durable afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if state kept outside the journal cannot be synced.
    fn snapshot(&mut self) -> CoreResult<Vec<Self::Change>>;
}

/// A participant journal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    /// The branch is prepared with these encoded changes.
    Prepare {
        /// The branch.
        xid: Xid,
        /// Encoded changes.
        changes: Vec<u8>,
    },
    /// A prepared branch committed.
    Commit {
        /// The branch.
        xid: Xid,
    },
    /// The branch committed without a prepare.
    OnePhaseCommit {
        /// The branch.
        xid: Xid,
        /// Encoded changes.
        changes: Vec<u8>,
    },
    /// A prepared branch rolled back.
    Rollback {
        /// The branch.
        xid: Xid,
    },
    /// The committed state of every transaction up to `xid.global`.
    Checkpoint {
        /// Newest settled transaction.
        xid: Xid,
        /// Encoded snapshot changes.
        changes: Vec<u8>,
    },
}

impl JournalRecord {
    /// The branch this record belongs to.
    #[must_use]
    pub fn xid(&self) -> Xid {
        match self {
            Self::Prepare { xid, .. }
            | Self::Commit { xid }
            | Self::OnePhaseCommit { xid, .. }
            | Self::Rollback { xid }
            | Self::Checkpoint { xid, .. } => *xid,
        }
    }

    /// Lowercase record name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Prepare { .. } => "prepare",
            Self::Commit { .. } => "commit",
            Self::OnePhaseCommit { .. } => "one_phase_commit",
            Self::Rollback { .. } => "rollback",
            Self::Checkpoint { .. } => "checkpoint",
        }
    }
}

impl LogRecord for JournalRecord {
    const MAGIC: [u8; 4] = *b"RJNL";
    const KIND: &'static str = "journal";

    fn type_byte(&self) -> u8 {
        match self {
            Self::Prepare { .. } => 1,
            Self::Commit { .. } => 2,
            Self::OnePhaseCommit { .. } => 3,
            Self::Rollback { .. } => 4,
            Self::Checkpoint { .. } => 5,
        }
    }

    fn encode_payload(&self, buf: &mut Vec<u8>) {
        self.xid().encode(buf);
        match self {
            Self::Prepare { changes, .. }
            | Self::OnePhaseCommit { changes, .. }
            | Self::Checkpoint { changes, .. } => {
                put_bytes(buf, changes);
            }
            Self::Commit { .. } | Self::Rollback { .. } => {}
        }
    }

    fn decode_payload(type_byte: u8, payload: &[u8]) -> CoreResult<Self> {
        let mut r = PayloadReader::new(payload);
        let xid = r.xid()?;
        let record = match type_byte {
            1 => Self::Prepare {
                xid,
                changes: r.bytes()?,
            },
            2 => Self::Commit { xid },
            3 => Self::OnePhaseCommit {
                xid,
                changes: r.bytes()?,
            },
            4 => Self::Rollback { xid },
            5 => Self::Checkpoint {
                xid,
                changes: r.bytes()?,
            },
            other => {
                return Err(CoreError::log_corruption(format!(
                    "unknown journal record type: {other}"
                )))
            }
        };
        r.finish(record.name())?;
        Ok(record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BranchStatus {
    Active,
    Ended,
    Prepared,
}

#[derive(Debug)]
struct Branch<C> {
    status: BranchStatus,
    changes: Vec<C>,
    failed: bool,
}

impl<C> Branch<C> {
    fn new(status: BranchStatus, changes: Vec<C>) -> Self {
        Self {
            status,
            changes,
            failed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Committed,
    RolledBack,
}

struct Inner<S: StoreState> {
    state: S,
    journal: FrameLog,
    branches: HashMap<Xid, Branch<S::Change>>,
    resolved: BTreeMap<Xid, Resolution>,
    /// Branches of transactions up to here that are neither live nor in
    /// `resolved` were resolved and then forgotten or evicted.
    settled_through: Option<TransactionId>,
    highest_txid: Option<TransactionId>,
}

impl<S: StoreState> Inner<S> {
    fn note_txid(&mut self, txid: TransactionId) {
        if self.highest_txid.map_or(true, |h| txid > h) {
            self.highest_txid = Some(txid);
        }
    }

    fn resolve(&mut self, xid: Xid, resolution: Resolution) {
        self.resolved.insert(xid, resolution);
        self.trim_history();
    }

    fn trim_history(&mut self) {
        while self.resolved.len() > RESOLVED_HISTORY {
            if let Some((evicted, _)) = self.resolved.pop_first() {
                self.settle_through(evicted.global);
            }
        }
    }

    fn settle_through(&mut self, txid: TransactionId) {
        if self.settled_through.map_or(true, |t| txid > t) {
            self.settled_through = Some(txid);
        }
    }

    /// Whether `xid` was resolved but is no longer remembered.
    fn settled_earlier(&self, xid: Xid) -> bool {
        !self.branches.contains_key(&xid)
            && self.settled_through.is_some_and(|t| xid.global <= t)
    }

    fn write(&mut self, record: &JournalRecord) -> CoreResult<()> {
        self.journal.append(record)?;
        self.journal.flush()
    }
}

fn encode_changes<S: StoreState>(changes: &[S::Change]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(changes.len() as u32).to_le_bytes());
    for change in changes {
        S::encode_change(change, &mut buf);
    }
    buf
}

fn decode_changes<S: StoreState>(bytes: &[u8]) -> CoreResult<Vec<S::Change>> {
    let mut r = PayloadReader::new(bytes);
    let count = r.u32()? as usize;
    let mut changes = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        changes.push(S::decode_change(&mut r)?);
    }
    r.finish("change list")?;
    Ok(changes)
}

/// A two-phase participant backed by a journal.
pub struct JournaledResource<S: StoreState> {
    name: String,
    inner: Mutex<Inner<S>>,
}

impl<S: StoreState> JournaledResource<S> {
    /// Opens the participant, replaying its journal into `state`.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal is corrupted or a committed branch
    /// cannot be re-applied.
    pub fn open(
        name: impl Into<String>,
        backend: Box<dyn StorageBackend>,
        mut state: S,
        sync_on_write: bool,
    ) -> CoreResult<Self> {
        let name = name.into();
        let mut journal = FrameLog::new(backend, sync_on_write);
        let records: Vec<JournalRecord> = journal.replay()?;
        let replayed = records.len();

        let mut pending: BTreeMap<Xid, Vec<S::Change>> = BTreeMap::new();
        let mut resolved = BTreeMap::new();
        let mut settled_through: Option<TransactionId> = None;
        let mut highest_txid = None;

        for record in records {
            let xid = record.xid();
            if highest_txid.map_or(true, |h| xid.global > h) {
                highest_txid = Some(xid.global);
            }
            match record {
                JournalRecord::Prepare { changes, .. } => {
                    pending.insert(xid, decode_changes::<S>(&changes)?);
                }
                JournalRecord::Commit { .. } => {
                    let changes = pending.remove(&xid).ok_or_else(|| {
                        CoreError::log_corruption(format!(
                            "{name} journal commits {xid} without a prepare"
                        ))
                    })?;
                    state.apply(&changes)?;
                    resolved.insert(xid, Resolution::Committed);
                }
                JournalRecord::OnePhaseCommit { changes, .. } => {
                    state.apply(&decode_changes::<S>(&changes)?)?;
                    resolved.insert(xid, Resolution::Committed);
                }
                JournalRecord::Rollback { .. } => {
                    pending.remove(&xid);
                    resolved.insert(xid, Resolution::RolledBack);
                }
                JournalRecord::Checkpoint { changes, .. } => {
                    state.apply(&decode_changes::<S>(&changes)?)?;
                    settled_through = settled_through.max(Some(xid.global));
                }
            }
        }

        let mut branches = HashMap::new();
        for (xid, changes) in pending {
            state.restore_in_doubt(&changes)?;
            branches.insert(xid, Branch::new(BranchStatus::Prepared, changes));
        }

        let mut inner = Inner {
            state,
            journal,
            branches,
            resolved,
            settled_through,
            highest_txid,
        };
        inner.trim_history();

        info!(
            resource = %name,
            replayed,
            in_doubt = inner.branches.len(),
            "journal replayed"
        );

        Ok(Self {
            name,
            inner: Mutex::new(inner),
        })
    }

    fn violation(&self, message: impl Into<String>) -> CoreError {
        let error = CoreError::protocol_violation(&self.name, message);
        warn!(resource = %self.name, %error, "rejected out-of-order call");
        error
    }

    fn failure(&self, step: &str, e: &CoreError) -> CoreError {
        CoreError::resource_failure(&self.name, format!("{step}: {e}"))
    }

    /// Adds a change to an active branch.
    ///
    /// # Errors
    ///
    /// `ProtocolViolation` if the branch is not active.
    pub fn stage(&self, xid: Xid, change: S::Change) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        match inner.branches.get_mut(&xid) {
            Some(branch) if branch.status == BranchStatus::Active => {
                branch.changes.push(change);
                Ok(())
            }
            Some(_) => Err(self.violation(format!("branch {xid} is no longer active"))),
            None => Err(self.violation(format!("branch {xid} was never started"))),
        }
    }

    /// Runs `f` against the committed state.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.inner.lock().state)
    }

    /// Runs `f` against the committed state and the changes staged by
    /// this participant's branch of `global`, if it has one.
    pub fn inspect_branch<R>(
        &self,
        global: TransactionId,
        f: impl FnOnce(&S, &[S::Change]) -> R,
    ) -> R {
        let inner = self.inner.lock();
        let changes = inner
            .branches
            .iter()
            .find(|(xid, _)| xid.global == global)
            .map_or(&[][..], |(_, b)| b.changes.as_slice());
        f(&inner.state, changes)
    }

    /// Highest transaction id this participant has seen.
    #[must_use]
    pub fn highest_txid(&self) -> Option<TransactionId> {
        self.inner.lock().highest_txid
    }

    /// Number of live (unresolved) branches.
    #[must_use]
    pub fn live_branches(&self) -> usize {
        self.inner.lock().branches.len()
    }

    /// Journal size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub fn journal_size(&self) -> CoreResult<u64> {
        self.inner.lock().journal.size()
    }

    /// Compacts the journal once it has grown past `limit` bytes.
    ///
    /// Returns whether it compacted.
    ///
    /// # Errors
    ///
    /// See [`compact`](Self::compact).
    pub fn compact_if_larger(&self, limit: u64) -> CoreResult<bool> {
        if self.journal_size()? <= limit {
            return Ok(false);
        }
        self.compact()?;
        Ok(true)
    }

    /// Replaces the journal with a checkpoint of the committed state
    /// followed by the prepare records of the branches still in doubt.
    ///
    /// Resolved branches fold into the settled watermark, so outcomes
    /// re-delivered for them stay no-ops. The swap is atomic: a crash
    /// leaves either the old journal or the compacted one.
    ///
    /// # Errors
    ///
    /// Returns `ResourceFailure` if the state cannot be snapshotted or the
    /// journal cannot be replaced; the old journal then stays in place.
    pub fn compact(&self) -> CoreResult<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let watermark = inner
            .resolved
            .keys()
            .map(|xid| xid.global)
            .max()
            .max(inner.settled_through);
        let Some(watermark) = watermark else {
            debug!(resource = %self.name, "nothing settled to compact");
            return Ok(());
        };

        let before = inner.journal.size()?;
        let snapshot = inner
            .state
            .snapshot()
            .map_err(|e| self.failure("snapshot", &e))?;
        let mut records = vec![JournalRecord::Checkpoint {
            xid: Xid::new(watermark, 0),
            changes: encode_changes::<S>(&snapshot),
        }];
        let mut in_doubt: Vec<(&Xid, &Branch<S::Change>)> = inner
            .branches
            .iter()
            .filter(|(_, b)| b.status == BranchStatus::Prepared)
            .collect();
        in_doubt.sort_by_key(|(xid, _)| **xid);
        records.extend(in_doubt.into_iter().map(|(xid, b)| JournalRecord::Prepare {
            xid: *xid,
            changes: encode_changes::<S>(&b.changes),
        }));

        inner
            .journal
            .rewrite(&records)
            .map_err(|e| self.failure("compact", &e))?;
        inner.resolved.clear();
        inner.settle_through(watermark);

        info!(
            resource = %self.name,
            before,
            after = inner.journal.size()?,
            %watermark,
            in_doubt = records.len() - 1,
            "journal compacted"
        );
        Ok(())
    }
}

impl<S: StoreState> ResourceManager for JournaledResource<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self, xid: Xid, flags: StartFlags) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        inner.note_txid(xid.global);
        match flags {
            StartFlags::New => {
                if inner.branches.contains_key(&xid) || inner.resolved.contains_key(&xid) {
                    return Err(self.violation(format!("branch {xid} already exists")));
                }
                inner
                    .branches
                    .insert(xid, Branch::new(BranchStatus::Active, Vec::new()));
                Ok(())
            }
            StartFlags::Join => match inner.branches.get_mut(&xid) {
                Some(branch) if branch.status != BranchStatus::Prepared => {
                    branch.status = BranchStatus::Active;
                    Ok(())
                }
                _ => Err(self.violation(format!("cannot join branch {xid}"))),
            },
        }
    }

    fn end(&self, xid: Xid, flags: EndFlags) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        match inner.branches.get_mut(&xid) {
            Some(branch) if branch.status != BranchStatus::Prepared => {
                branch.status = BranchStatus::Ended;
                if flags == EndFlags::Fail {
                    branch.failed = true;
                }
                Ok(())
            }
            Some(_) => Err(self.violation(format!("branch {xid} is already prepared"))),
            None => Err(self.violation(format!("end of branch {xid} never started"))),
        }
    }

    fn prepare(&self, xid: Xid) -> CoreResult<Vote> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let Some(branch) = inner.branches.get(&xid) else {
            return Err(if inner.resolved.contains_key(&xid) {
                self.violation(format!("branch {xid} is already resolved"))
            } else {
                self.violation(format!("prepare of branch {xid} never started"))
            });
        };
        match branch.status {
            BranchStatus::Prepared => {
                return Err(self.violation(format!("branch {xid} is already prepared")))
            }
            BranchStatus::Active => {
                return Err(self.violation(format!("branch {xid} was not ended")))
            }
            BranchStatus::Ended => {}
        }

        if branch.failed {
            if let Some(branch) = inner.branches.remove(&xid) {
                inner.state.discard(&branch.changes);
            }
            inner.resolve(xid, Resolution::RolledBack);
            debug!(resource = %self.name, %xid, "failed branch votes rollback");
            return Ok(Vote::RollbackOnly);
        }

        if branch.changes.is_empty() {
            inner.branches.remove(&xid);
            inner.resolve(xid, Resolution::Committed);
            return Ok(Vote::ReadOnly);
        }

        if let Err(e) = inner.state.check(xid, &branch.changes) {
            warn!(resource = %self.name, %xid, error = %e, "prepare check failed");
            if let Some(branch) = inner.branches.remove(&xid) {
                inner.state.discard(&branch.changes);
            }
            inner.resolve(xid, Resolution::RolledBack);
            return Err(e);
        }

        let record = JournalRecord::Prepare {
            xid,
            changes: encode_changes::<S>(&branch.changes),
        };
        inner.write(&record).map_err(|e| self.failure("prepare", &e))?;

        if let Some(branch) = inner.branches.get_mut(&xid) {
            branch.status = BranchStatus::Prepared;
        }
        debug!(resource = %self.name, %xid, "branch prepared");
        Ok(Vote::Ok)
    }

    fn commit(&self, xid: Xid, one_phase: bool) -> CoreResult<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(resolution) = inner.resolved.get(&xid) {
            if *resolution == Resolution::RolledBack {
                warn!(resource = %self.name, %xid, "commit re-delivered for a rolled back branch");
            }
            return Ok(());
        }
        if inner.settled_earlier(xid) {
            debug!(resource = %self.name, %xid, "commit re-delivered for a settled branch");
            return Ok(());
        }

        let Some(branch) = inner.branches.get(&xid) else {
            return Err(self.violation(format!("commit of branch {xid} never started")));
        };

        if one_phase {
            match branch.status {
                BranchStatus::Prepared => {
                    return Err(self.violation(format!("one-phase commit of prepared {xid}")))
                }
                BranchStatus::Active => {
                    return Err(self.violation(format!("branch {xid} was not ended")))
                }
                BranchStatus::Ended => {}
            }

            let veto = if branch.failed {
                Some(CoreError::rollback_required(xid.global, "branch was ended with fail"))
            } else {
                inner.state.check(xid, &branch.changes).err()
            };
            if let Some(e) = veto {
                if let Some(branch) = inner.branches.remove(&xid) {
                    inner.state.discard(&branch.changes);
                }
                inner.resolve(xid, Resolution::RolledBack);
                return Err(e);
            }

            if !branch.changes.is_empty() {
                let record = JournalRecord::OnePhaseCommit {
                    xid,
                    changes: encode_changes::<S>(&branch.changes),
                };
                inner.write(&record).map_err(|e| self.failure("commit", &e))?;
            }
        } else {
            if branch.status != BranchStatus::Prepared {
                return Err(self.violation(format!("commit of unprepared branch {xid}")));
            }
            inner
                .write(&JournalRecord::Commit { xid })
                .map_err(|e| self.failure("commit", &e))?;
        }

        let Some(branch) = inner.branches.remove(&xid) else {
            return Err(self.violation(format!("branch {xid} vanished during commit")));
        };
        inner.resolve(xid, Resolution::Committed);
        inner
            .state
            .apply(&branch.changes)
            .map_err(|e| self.failure("apply", &e))?;
        debug!(resource = %self.name, %xid, one_phase, "branch committed");
        Ok(())
    }

    fn rollback(&self, xid: Xid) -> CoreResult<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(resolution) = inner.resolved.get(&xid) {
            if *resolution == Resolution::Committed {
                warn!(resource = %self.name, %xid, "rollback re-delivered for a committed branch");
            }
            return Ok(());
        }
        if inner.settled_earlier(xid) {
            debug!(resource = %self.name, %xid, "rollback re-delivered for a settled branch");
            return Ok(());
        }

        let Some(branch) = inner.branches.get(&xid) else {
            return Err(self.violation(format!("rollback of branch {xid} never started")));
        };
        if branch.status == BranchStatus::Prepared {
            inner
                .write(&JournalRecord::Rollback { xid })
                .map_err(|e| self.failure("rollback", &e))?;
        }

        if let Some(branch) = inner.branches.remove(&xid) {
            inner.state.discard(&branch.changes);
        }
        inner.resolve(xid, Resolution::RolledBack);
        debug!(resource = %self.name, %xid, "branch rolled back");
        Ok(())
    }

    fn recover(&self, flags: RecoverFlags) -> CoreResult<Vec<Xid>> {
        if flags == RecoverFlags::EndScan {
            return Ok(Vec::new());
        }
        let inner = self.inner.lock();
        let mut in_doubt: Vec<Xid> = inner
            .branches
            .iter()
            .filter(|(_, b)| b.status == BranchStatus::Prepared)
            .map(|(xid, _)| *xid)
            .collect();
        in_doubt.sort();
        Ok(in_doubt)
    }

    fn forget(&self, xid: Xid) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.branches.contains_key(&xid) {
            return Err(self.violation(format!("cannot forget live branch {xid}")));
        }
        if inner.resolved.remove(&xid).is_some() {
            inner.settle_through(xid.global);
        } else {
            debug!(resource = %self.name, %xid, "forget of an unknown branch");
        }
        Ok(())
    }
}

impl<S: StoreState> fmt::Debug for JournaledResource<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JournaledResource")
            .field("name", &self.name)
            .field("live_branches", &self.live_branches())
            .finish()
    }
}
