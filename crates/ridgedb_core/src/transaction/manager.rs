//! Transaction manager.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::resource::{EndFlags, ResourceManager, ResourceRegistry, StartFlags, Vote};
use crate::transaction::state::{Branch, Transaction, TransactionInfo, TransactionState};
use crate::txlog::{Decision, LogEntry, RecoveryLog};
use crate::types::{TransactionId, Xid};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result of [`TransactionManager::enlist`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enlistment {
    /// A new branch was started.
    Enlisted(Xid),
    /// The same participant was already enlisted; its branch was joined.
    AlreadyEnlisted(Xid),
}

impl Enlistment {
    /// The branch the participant works under.
    #[must_use]
    pub fn xid(self) -> Xid {
        match self {
            Self::Enlisted(xid) | Self::AlreadyEnlisted(xid) => xid,
        }
    }
}

/// Outcome of a participant call made under the timeout.
pub(crate) enum Answer<T> {
    Done(CoreResult<T>),
    TimedOut,
}

/// Runs `f` against `rm`, giving up after `timeout`.
///
/// A call that times out keeps running on its own thread; its result is
/// dropped.
pub(crate) fn call_with_timeout<T, F>(
    rm: &Arc<dyn ResourceManager>,
    timeout: Option<Duration>,
    f: F,
) -> Answer<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn ResourceManager) -> CoreResult<T> + Send + 'static,
{
    let Some(timeout) = timeout else {
        return Answer::Done(f(rm.as_ref()));
    };

    let (tx, rx) = mpsc::channel();
    let participant = Arc::clone(rm);
    let spawned = thread::Builder::new()
        .name(format!("ridgedb-rm-{}", rm.name()))
        .spawn(move || {
            let _ = tx.send(f(participant.as_ref()));
        });
    if let Err(e) = spawned {
        return Answer::Done(Err(e.into()));
    }

    match rx.recv_timeout(timeout) {
        Ok(result) => Answer::Done(result),
        Err(mpsc::RecvTimeoutError::Timeout) => Answer::TimedOut,
        Err(mpsc::RecvTimeoutError::Disconnected) => Answer::Done(Err(
            CoreError::resource_failure(rm.name(), "participant call panicked"),
        )),
    }
}

/// Coordinates transactions across resource managers.
///
/// The coordinator:
/// - hands out transaction ids and tracks enlisted participants
/// - commits a single participant in one phase, several in two
/// - logs every two-phase decision to the [`RecoveryLog`] before acting on it
/// - refuses new transactions until [`recover`](Self::recover) has run
///
/// Transactions never share coordinator locks while their participants are
/// being driven, so unrelated commits do not wait on each other.
pub struct TransactionManager {
    pub(crate) log: Arc<RecoveryLog>,
    pub(crate) registry: Arc<ResourceRegistry>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) force_recovery: bool,
    next_txid: AtomicU64,
    pub(crate) recovered: AtomicBool,
    active: RwLock<HashMap<TransactionId, Arc<Mutex<Transaction>>>>,
    /// Transactions whose outcome is not known everywhere.
    pub(crate) in_doubt: Mutex<BTreeMap<TransactionId, Transaction>>,
}

impl TransactionManager {
    /// Creates a coordinator over `log` and `registry`.
    ///
    /// No transaction can begin until [`recover`](Self::recover) completes.
    pub fn new(log: Arc<RecoveryLog>, registry: Arc<ResourceRegistry>, config: &Config) -> Self {
        let next = log.highest_txid().map_or(1, |id| id.as_u64() + 1);
        Self {
            log,
            registry,
            timeout: config.transaction_timeout,
            force_recovery: config.force_recovery,
            next_txid: AtomicU64::new(next),
            recovered: AtomicBool::new(false),
            active: RwLock::new(HashMap::new()),
            in_doubt: Mutex::new(BTreeMap::new()),
        }
    }

    /// The recovery log.
    #[must_use]
    pub fn log(&self) -> &Arc<RecoveryLog> {
        &self.log
    }

    /// The participant registry consulted by recovery.
    #[must_use]
    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    /// Makes sure future ids are above `txid`.
    ///
    /// Called with the highest id each participant journal has seen, so ids
    /// stay unique across restarts even after the recovery log rotates.
    pub fn observe_txid(&self, txid: TransactionId) {
        self.next_txid.fetch_max(txid.as_u64() + 1, Ordering::SeqCst);
    }

    /// Whether startup recovery has completed.
    #[must_use]
    pub fn is_recovered(&self) -> bool {
        self.recovered.load(Ordering::SeqCst)
    }

    /// Begins a new transaction.
    ///
    /// # Errors
    ///
    /// Returns `RecoveryIncomplete` until recovery has run.
    pub fn begin(&self) -> CoreResult<TransactionId> {
        if !self.is_recovered() {
            return Err(CoreError::RecoveryIncomplete);
        }
        let txid = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        self.active
            .write()
            .insert(txid, Arc::new(Mutex::new(Transaction::new(txid))));
        debug!(%txid, "transaction started");
        Ok(txid)
    }

    fn active(&self, txid: TransactionId) -> CoreResult<Arc<Mutex<Transaction>>> {
        self.active
            .read()
            .get(&txid)
            .cloned()
            .ok_or_else(|| CoreError::not_found(txid.to_string()))
    }

    /// Removes a transaction from the active set for completion.
    fn take(&self, txid: TransactionId) -> CoreResult<Transaction> {
        let shared = self
            .active
            .write()
            .remove(&txid)
            .ok_or_else(|| CoreError::not_found(txid.to_string()))?;
        let mut guard = shared.lock();
        let tx = std::mem::replace(
            &mut *guard,
            Transaction::with_branches(txid, TransactionState::Committing, Vec::new()),
        );
        Ok(tx)
    }

    /// Associates a participant with a transaction.
    ///
    /// Enlisting a participant that [`is_same_rm`](ResourceManager::is_same_rm)
    /// as one already enlisted joins the existing branch.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown transaction, `InvalidOperation`
    /// when it is no longer active, and the participant's error if `start`
    /// fails.
    pub fn enlist(&self, txid: TransactionId, rm: Arc<dyn ResourceManager>) -> CoreResult<Enlistment> {
        let shared = self.active(txid)?;
        let mut tx = shared.lock();
        if tx.state != TransactionState::Active {
            return Err(CoreError::invalid_operation(format!(
                "{txid} is {}, cannot enlist",
                tx.state
            )));
        }

        if let Some(branch) = tx.branches.iter().find(|b| b.rm.is_same_rm(rm.as_ref())) {
            let xid = branch.xid;
            branch.rm.start(xid, StartFlags::Join)?;
            return Ok(Enlistment::AlreadyEnlisted(xid));
        }

        let ordinal = u32::try_from(tx.branches.len())
            .map_err(|_| CoreError::invalid_operation("too many participants"))?;
        let xid = Xid::new(txid, ordinal);
        rm.start(xid, StartFlags::New)?;
        debug!(%xid, resource = rm.name(), "participant enlisted");
        tx.branches.push(Branch { rm, xid });
        Ok(Enlistment::Enlisted(xid))
    }

    /// Marks a transaction so that commit rolls it back.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown transaction.
    pub fn set_rollback_only(&self, txid: TransactionId) -> CoreResult<()> {
        self.active(txid)?.lock().rollback_only = true;
        Ok(())
    }

    /// Current state of a transaction the coordinator still tracks.
    #[must_use]
    pub fn state(&self, txid: TransactionId) -> Option<TransactionState> {
        if let Some(shared) = self.active.read().get(&txid) {
            return Some(shared.lock().state);
        }
        self.in_doubt.lock().get(&txid).map(|tx| tx.state)
    }

    /// Number of transactions currently active.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    /// Transactions left with a heuristic or unknown outcome.
    #[must_use]
    pub fn in_doubt(&self) -> Vec<TransactionInfo> {
        self.in_doubt.lock().values().map(Transaction::info).collect()
    }

    fn call<T, F>(&self, txid: TransactionId, branch: &Branch, operation: &'static str, f: F) -> CoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ResourceManager) -> CoreResult<T> + Send + 'static,
    {
        match call_with_timeout(&branch.rm, self.timeout, f) {
            Answer::Done(result) => result,
            Answer::TimedOut => {
                warn!(%txid, resource = branch.name(), operation, "participant call timed out");
                Err(CoreError::Timeout {
                    txid,
                    resource: branch.name().to_string(),
                    operation,
                })
            }
        }
    }

    fn park(&self, tx: Transaction) {
        warn!(txid = %tx.id, state = %tx.state, "transaction left in doubt");
        self.in_doubt.lock().insert(tx.id, tx);
    }

    fn rotate_log(&self) {
        if let Err(e) = self.log.rotate_if_idle(|| !self.in_doubt.lock().is_empty()) {
            warn!(error = %e, "recovery log rotation failed");
        }
    }

    fn log_entries(&self, entries: &[LogEntry]) {
        if let Err(e) = self.log.append(entries) {
            warn!(error = %e, "recovery log append failed");
        }
    }

    /// Commits a transaction.
    ///
    /// One enlisted participant is committed in one phase. Several are
    /// prepared first, in enlistment order; commit is delivered only after
    /// every one has voted, and only if none vetoed.
    ///
    /// # Errors
    ///
    /// - `RollbackRequired` if the transaction was rolled back instead
    /// - `HeuristicMixed` if a participant failed after commit was decided
    /// - `Timeout` if a participant did not answer; the transaction stays
    ///   in doubt until recovery or [`forget`](Self::forget)
    pub fn commit(&self, txid: TransactionId) -> CoreResult<()> {
        let mut tx = self.take(txid)?;

        if tx.rollback_only {
            self.roll_back_branches(&mut tx, &[]);
            return Err(CoreError::rollback_required(txid, "marked rollback-only"));
        }

        for branch in tx.branches.clone() {
            let xid = branch.xid;
            if let Err(e) = self.call(txid, &branch, "end", move |rm| rm.end(xid, EndFlags::Success)) {
                warn!(%txid, resource = branch.name(), error = %e, "end failed");
                self.roll_back_branches(&mut tx, &[]);
                return Err(CoreError::rollback_required(
                    txid,
                    format!("end failed on '{}': {e}", branch.name()),
                ));
            }
        }

        let result = match tx.branches.len() {
            0 => {
                tx.state = TransactionState::Committed;
                Ok(())
            }
            1 => self.commit_one_phase(tx),
            _ => self.commit_two_phase(tx),
        };
        self.rotate_log();
        result
    }

    fn commit_one_phase(&self, mut tx: Transaction) -> CoreResult<()> {
        let txid = tx.id;
        let branch = tx.branches[0].clone();
        let xid = branch.xid;
        tx.state = TransactionState::Committing;

        match self.call(txid, &branch, "commit", move |rm| rm.commit(xid, true)) {
            Ok(()) => {
                tx.state = TransactionState::Committed;
                debug!(%txid, resource = branch.name(), "committed in one phase");
                Ok(())
            }
            Err(e @ CoreError::Timeout { .. }) => {
                self.park(tx);
                Err(e)
            }
            Err(e) => {
                warn!(%txid, resource = branch.name(), error = %e, "one-phase commit failed");
                self.roll_back_branches(&mut tx, &[]);
                Err(CoreError::rollback_required(txid, e.to_string()))
            }
        }
    }

    fn commit_two_phase(&self, mut tx: Transaction) -> CoreResult<()> {
        let txid = tx.id;
        tx.state = TransactionState::Preparing;

        let enlisted: Vec<LogEntry> = tx
            .branches
            .iter()
            .map(|b| LogEntry::new(b.xid, b.name(), Decision::Enlisted))
            .collect();
        if let Err(e) = self.log.append(&enlisted) {
            error!(%txid, error = %e, "cannot log enlistment");
            self.roll_back_branches(&mut tx, &[]);
            return Err(CoreError::rollback_required(txid, e.to_string()));
        }

        let mut read_only = Vec::new();
        let mut veto: Option<CoreError> = None;
        for (i, branch) in tx.branches.clone().into_iter().enumerate() {
            let xid = branch.xid;
            let vote = self.call(txid, &branch, "prepare", move |rm| rm.prepare(xid));
            let decision = match vote {
                Ok(Vote::Ok) => Decision::Prepared,
                Ok(Vote::ReadOnly) => {
                    read_only.push(i);
                    Decision::ReadOnly
                }
                Ok(Vote::RollbackOnly) => {
                    warn!(%txid, resource = branch.name(), "participant voted rollback");
                    veto = Some(CoreError::rollback_required(
                        txid,
                        format!("'{}' voted rollback", branch.name()),
                    ));
                    break;
                }
                Err(e) => {
                    warn!(%txid, resource = branch.name(), error = %e, "prepare failed");
                    veto = Some(e);
                    break;
                }
            };
            if let Err(e) = self.log.append(&[LogEntry::new(xid, branch.name(), decision)]) {
                error!(%txid, error = %e, "cannot log vote");
                veto = Some(CoreError::rollback_required(txid, e.to_string()));
                break;
            }
        }

        if let Some(e) = veto {
            let settled = self.roll_back_branches(&mut tx, &read_only);
            let keep = !settled
                || matches!(e, CoreError::Timeout { .. } | CoreError::RollbackRequired { .. });
            if keep {
                return Err(e);
            }
            return Err(CoreError::rollback_required(txid, e.to_string()));
        }

        tx.state = TransactionState::Prepared;
        debug!(%txid, participants = tx.branches.len(), "all participants prepared");
        tx.state = TransactionState::Committing;

        let mut committed = Vec::new();
        let mut failed = Vec::new();
        let mut timeout = None;
        for (i, branch) in tx.branches.clone().into_iter().enumerate() {
            if read_only.contains(&i) {
                continue;
            }
            let xid = branch.xid;
            match self.call(txid, &branch, "commit", move |rm| rm.commit(xid, false)) {
                Ok(()) => {
                    self.log_entries(&[LogEntry::new(xid, branch.name(), Decision::Committed)]);
                    committed.push(branch.name().to_string());
                }
                Err(e @ CoreError::Timeout { .. }) => {
                    timeout.get_or_insert(e);
                }
                Err(e) => {
                    error!(%txid, resource = branch.name(), error = %e, "commit failed after prepare");
                    self.log_entries(&[LogEntry::new(xid, branch.name(), Decision::HeuristicMixed)]);
                    failed.push(branch.name().to_string());
                }
            }
        }

        if !failed.is_empty() {
            tx.state = TransactionState::HeuristicMixed;
            self.park(tx);
            return Err(CoreError::HeuristicMixed {
                txid,
                committed,
                failed,
            });
        }
        if let Some(e) = timeout {
            self.park(tx);
            return Err(e);
        }

        tx.state = TransactionState::Committed;
        debug!(%txid, "committed in two phases");
        Ok(())
    }

    /// Rolls back every branch except those at the indices in `skip`.
    ///
    /// Returns whether every branch was settled. Branches that could not be
    /// rolled back leave the transaction in doubt.
    fn roll_back_branches(&self, tx: &mut Transaction, skip: &[usize]) -> bool {
        let txid = tx.id;
        tx.state = TransactionState::RollingBack;
        let logged = self
            .log
            .summary(txid)
            .is_some_and(|s| !s.enlisted.is_empty());

        let mut settled = true;
        let mut entries = Vec::new();
        for (i, branch) in tx.branches.clone().into_iter().enumerate() {
            if skip.contains(&i) {
                continue;
            }
            let xid = branch.xid;
            if let Err(e) = self.call(txid, &branch, "end", move |rm| rm.end(xid, EndFlags::Fail)) {
                debug!(%txid, resource = branch.name(), error = %e, "end with fail rejected");
            }
            match self.call(txid, &branch, "rollback", move |rm| rm.rollback(xid)) {
                Ok(()) => entries.push(LogEntry::new(xid, branch.name(), Decision::RolledBack)),
                Err(e) if e.is_protocol_violation() => {
                    debug!(%txid, resource = branch.name(), error = %e, "rollback rejected");
                    entries.push(LogEntry::new(xid, branch.name(), Decision::RolledBack));
                }
                Err(e) => {
                    warn!(%txid, resource = branch.name(), error = %e, "rollback failed");
                    settled = false;
                }
            }
        }
        if logged {
            self.log_entries(&entries);
        }

        if settled {
            tx.state = TransactionState::RolledBack;
            debug!(%txid, "rolled back");
        } else {
            let parked = Transaction::with_branches(txid, tx.state, tx.branches.clone());
            self.park(parked);
        }
        settled
    }

    /// Rolls back a transaction.
    ///
    /// Participant failures are logged and otherwise ignored.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown transaction.
    pub fn rollback(&self, txid: TransactionId) -> CoreResult<()> {
        let mut tx = self.take(txid)?;
        self.roll_back_branches(&mut tx, &[]);
        Ok(())
    }

    /// Acknowledges an in-doubt transaction and drops it.
    ///
    /// Sends `forget` to every branch and logs each acknowledgement. The
    /// transaction is released once every branch has acknowledged; branches
    /// that failed stay in doubt, and their log entries stay behind, until a
    /// later `forget` succeeds. Unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns the first participant failure, or an error if the
    /// acknowledgements cannot be logged.
    pub fn forget(&self, txid: TransactionId) -> CoreResult<()> {
        let Some(mut tx) = self.in_doubt.lock().remove(&txid) else {
            return Ok(());
        };
        let mut entries = Vec::new();
        let mut acknowledged = Vec::new();
        let mut pending = Vec::new();
        let mut failure = None;
        for branch in std::mem::take(&mut tx.branches) {
            let xid = branch.xid;
            match self.call(txid, &branch, "forget", move |rm| rm.forget(xid)) {
                Ok(()) => {
                    entries.push(LogEntry::new(xid, branch.name(), Decision::Forgotten));
                    acknowledged.push(branch);
                }
                Err(e) => {
                    warn!(%txid, resource = branch.name(), error = %e, "forget failed");
                    failure.get_or_insert(e);
                    pending.push(branch);
                }
            }
        }

        if let Err(e) = self.log.append(&entries) {
            error!(%txid, error = %e, "cannot log forget");
            pending.extend(acknowledged);
            tx.branches = pending;
            self.park(tx);
            return Err(e);
        }
        if let Some(e) = failure {
            tx.branches = pending;
            self.park(tx);
            return Err(e);
        }
        info!(%txid, state = %tx.state, "in-doubt transaction forgotten");
        self.rotate_log();
        Ok(())
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("next_txid", &self.next_txid.load(Ordering::SeqCst))
            .field("recovered", &self.is_recovered())
            .field("active", &self.active_count())
            .field("in_doubt", &self.in_doubt.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::RecoverFlags;
    use ridgedb_storage::InMemoryBackend;
    use std::sync::atomic::AtomicUsize;

    /// A participant that records calls and can be told how to vote.
    struct Scripted {
        name: &'static str,
        vote: CoreResult<Vote>,
        fail_commit: bool,
        calls: Mutex<Vec<String>>,
        commits: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &'static str) -> Arc<Self> {
            Self::voting(name, Ok(Vote::Ok))
        }

        fn voting(name: &'static str, vote: CoreResult<Vote>) -> Arc<Self> {
            Arc::new(Self {
                name,
                vote,
                fail_commit: false,
                calls: Mutex::new(Vec::new()),
                commits: AtomicUsize::new(0),
            })
        }

        fn failing_commit(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                fail_commit: true,
                ..Arc::into_inner(Self::new(name)).unwrap()
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn note(&self, call: &str) {
            self.calls.lock().push(call.to_string());
        }
    }

    impl ResourceManager for Scripted {
        fn name(&self) -> &str {
            self.name
        }
        fn start(&self, _: Xid, flags: StartFlags) -> CoreResult<()> {
            self.note(match flags {
                StartFlags::New => "start",
                StartFlags::Join => "join",
            });
            Ok(())
        }
        fn end(&self, _: Xid, flags: EndFlags) -> CoreResult<()> {
            self.note(match flags {
                EndFlags::Success => "end",
                EndFlags::Fail => "end-fail",
            });
            Ok(())
        }
        fn prepare(&self, _: Xid) -> CoreResult<Vote> {
            self.note("prepare");
            match &self.vote {
                Ok(v) => Ok(*v),
                Err(_) => Err(CoreError::resource_failure(self.name, "disk full")),
            }
        }
        fn commit(&self, _: Xid, one_phase: bool) -> CoreResult<()> {
            self.note(if one_phase { "commit-1pc" } else { "commit" });
            if self.fail_commit {
                return Err(CoreError::resource_failure(self.name, "disk gone"));
            }
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn rollback(&self, _: Xid) -> CoreResult<()> {
            self.note("rollback");
            Ok(())
        }
        fn recover(&self, _: RecoverFlags) -> CoreResult<Vec<Xid>> {
            Ok(Vec::new())
        }
        fn forget(&self, _: Xid) -> CoreResult<()> {
            self.note("forget");
            Ok(())
        }
    }

    fn manager() -> TransactionManager {
        let log = Arc::new(RecoveryLog::open(Box::new(InMemoryBackend::new()), false, 1 << 20).unwrap());
        let tm = TransactionManager::new(log, Arc::new(ResourceRegistry::new()), &Config::default());
        tm.recover().unwrap();
        tm
    }

    #[test]
    fn begin_requires_recovery() {
        let log = Arc::new(RecoveryLog::open(Box::new(InMemoryBackend::new()), false, 1 << 20).unwrap());
        let tm = TransactionManager::new(log, Arc::new(ResourceRegistry::new()), &Config::default());
        assert!(matches!(tm.begin(), Err(CoreError::RecoveryIncomplete)));
        tm.recover().unwrap();
        assert!(tm.begin().is_ok());
    }

    #[test]
    fn single_participant_commits_in_one_phase() {
        let tm = manager();
        let a = Scripted::new("a");
        let txid = tm.begin().unwrap();
        tm.enlist(txid, a.clone()).unwrap();
        tm.commit(txid).unwrap();
        assert_eq!(a.calls(), vec!["start", "end", "commit-1pc"]);
        assert!(tm.log().entries().unwrap().is_empty());
        assert_eq!(tm.state(txid), None);
    }

    #[test]
    fn same_participant_is_coalesced() {
        let tm = manager();
        let a = Scripted::new("a");
        let again = Scripted::new("a");
        let txid = tm.begin().unwrap();
        let first = tm.enlist(txid, a.clone()).unwrap();
        let second = tm.enlist(txid, again).unwrap();
        assert_eq!(second, Enlistment::AlreadyEnlisted(first.xid()));
        tm.commit(txid).unwrap();
        assert_eq!(a.calls(), vec!["start", "join", "end", "commit-1pc"]);
    }

    #[test]
    fn two_participants_prepare_before_any_commit() {
        let tm = manager();
        let a = Scripted::new("a");
        let b = Scripted::new("b");
        let txid = tm.begin().unwrap();
        tm.enlist(txid, a.clone()).unwrap();
        tm.enlist(txid, b.clone()).unwrap();
        tm.commit(txid).unwrap();

        assert_eq!(a.calls(), vec!["start", "end", "prepare", "commit"]);
        assert_eq!(b.calls(), vec!["start", "end", "prepare", "commit"]);
        let decisions: Vec<Decision> = tm.log().entries().unwrap().iter().map(|e| e.decision).collect();
        assert_eq!(
            decisions,
            vec![
                Decision::Enlisted,
                Decision::Enlisted,
                Decision::Prepared,
                Decision::Prepared,
                Decision::Committed,
                Decision::Committed,
            ]
        );
        assert!(tm.log().summary(txid).unwrap().is_resolved());
    }

    #[test]
    fn prepare_failure_rolls_everyone_back() {
        let tm = manager();
        let a = Scripted::new("a");
        let b = Scripted::voting("b", Err(CoreError::RecoveryIncomplete));
        let c = Scripted::new("c");
        let txid = tm.begin().unwrap();
        for rm in [a.clone(), b.clone(), c.clone()] {
            tm.enlist(txid, rm).unwrap();
        }

        let err = tm.commit(txid).unwrap_err();
        assert!(matches!(err, CoreError::RollbackRequired { .. }));
        assert_eq!(a.commits.load(Ordering::SeqCst), 0);
        assert_eq!(c.commits.load(Ordering::SeqCst), 0);
        assert!(a.calls().contains(&"rollback".to_string()));
        assert!(!c.calls().contains(&"prepare".to_string()));
        assert!(c.calls().contains(&"rollback".to_string()));
        assert!(tm.log().summary(txid).unwrap().is_resolved());
        assert!(tm.in_doubt().is_empty());
    }

    #[test]
    fn rollback_vote_aborts() {
        let tm = manager();
        let a = Scripted::new("a");
        let b = Scripted::voting("b", Ok(Vote::RollbackOnly));
        let txid = tm.begin().unwrap();
        tm.enlist(txid, a.clone()).unwrap();
        tm.enlist(txid, b).unwrap();
        assert!(matches!(
            tm.commit(txid),
            Err(CoreError::RollbackRequired { .. })
        ));
        assert_eq!(a.commits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn read_only_participant_is_not_committed() {
        let tm = manager();
        let a = Scripted::new("a");
        let b = Scripted::voting("b", Ok(Vote::ReadOnly));
        let txid = tm.begin().unwrap();
        tm.enlist(txid, a.clone()).unwrap();
        tm.enlist(txid, b.clone()).unwrap();
        tm.commit(txid).unwrap();
        assert_eq!(a.commits.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls(), vec!["start", "end", "prepare"]);
    }

    #[test]
    fn commit_failure_after_prepare_is_heuristic() {
        let tm = manager();
        let a = Scripted::new("a");
        let b = Scripted::failing_commit("b");
        let txid = tm.begin().unwrap();
        tm.enlist(txid, a.clone()).unwrap();
        tm.enlist(txid, b.clone()).unwrap();

        match tm.commit(txid) {
            Err(CoreError::HeuristicMixed { committed, failed, .. }) => {
                assert_eq!(committed, vec!["a"]);
                assert_eq!(failed, vec!["b"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(b.calls().iter().filter(|c| *c == "commit").count(), 1);
        assert_eq!(tm.state(txid), Some(TransactionState::HeuristicMixed));
        assert!(tm.log().summary(txid).unwrap().is_heuristic());

        tm.forget(txid).unwrap();
        assert!(tm.in_doubt().is_empty());
        assert!(b.calls().contains(&"forget".to_string()));
        assert!(tm.log().summary(txid).map_or(true, |s| s.is_resolved()));
        tm.forget(txid).unwrap();
    }

    #[test]
    fn rollback_only_commit_rolls_back() {
        let tm = manager();
        let a = Scripted::new("a");
        let txid = tm.begin().unwrap();
        tm.enlist(txid, a.clone()).unwrap();
        tm.set_rollback_only(txid).unwrap();
        assert!(tm.commit(txid).is_err());
        assert_eq!(a.calls(), vec!["start", "end-fail", "rollback"]);
    }

    #[test]
    fn explicit_rollback() {
        let tm = manager();
        let a = Scripted::new("a");
        let txid = tm.begin().unwrap();
        tm.enlist(txid, a.clone()).unwrap();
        tm.rollback(txid).unwrap();
        assert_eq!(a.calls(), vec!["start", "end-fail", "rollback"]);
        assert!(matches!(tm.commit(txid), Err(CoreError::NotFound { .. })));
    }

    #[test]
    fn ids_continue_past_observed() {
        let tm = manager();
        tm.observe_txid(TransactionId::new(41));
        assert_eq!(tm.begin().unwrap(), TransactionId::new(42));
    }
}
