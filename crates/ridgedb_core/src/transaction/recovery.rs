//! Startup recovery.
//!
//! Every registered participant reports the branches it holds prepared.
//! Each reported branch is committed if the recovery log shows that every
//! participant of its transaction voted to commit, and rolled back
//! otherwise; a transaction the log never heard of never got past its
//! first prepare and is rolled back.

use crate::error::{CoreError, CoreResult};
use crate::resource::{RecoverFlags, ResourceManager};
use crate::transaction::manager::{call_with_timeout, Answer, TransactionManager};
use crate::transaction::state::{Branch, Transaction, TransactionState};
use crate::txlog::{Decision, LogEntry};
use crate::types::{TransactionId, Xid};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What startup recovery did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Branches committed.
    pub committed: Vec<Xid>,
    /// Branches rolled back.
    pub rolled_back: Vec<Xid>,
    /// Transactions left in doubt.
    pub in_doubt: Vec<TransactionId>,
    /// Participants that could not answer and were skipped by override.
    pub skipped: Vec<String>,
}

impl RecoveryReport {
    /// Whether recovery had nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
            && self.rolled_back.is_empty()
            && self.in_doubt.is_empty()
            && self.skipped.is_empty()
    }
}

impl TransactionManager {
    /// Reconciles participants with the recovery log.
    ///
    /// Must run before the first [`begin`](Self::begin). Running it again
    /// is harmless.
    ///
    /// # Errors
    ///
    /// Returns `RecoveryFailed` if a participant cannot report its in-doubt
    /// branches, unless `force_recovery` is set, in which case the
    /// participant is skipped.
    pub fn recover(&self) -> CoreResult<RecoveryReport> {
        let participants = self.registry.all();
        info!(participants = participants.len(), "recovery started");

        let mut report = RecoveryReport::default();
        let mut reported: BTreeMap<TransactionId, Vec<Branch>> = BTreeMap::new();

        for rm in &participants {
            let scan = call_with_timeout(rm, self.timeout, |rm| rm.recover(RecoverFlags::Full));
            let message = match scan {
                Answer::Done(Ok(xids)) => {
                    for xid in xids {
                        reported.entry(xid.global).or_default().push(Branch {
                            rm: Arc::clone(rm),
                            xid,
                        });
                    }
                    continue;
                }
                Answer::Done(Err(e)) => e.to_string(),
                Answer::TimedOut => "timed out".to_string(),
            };
            if !self.force_recovery {
                error!(resource = rm.name(), %message, "participant cannot recover");
                return Err(CoreError::recovery_failed(rm.name(), message));
            }
            warn!(resource = rm.name(), %message, "participant skipped by forced recovery");
            report.skipped.push(rm.name().to_string());
        }

        let mut in_doubt: Vec<Transaction> = Vec::new();

        for (txid, branches) in reported {
            self.observe_txid(txid);
            let commit = self.log.summary(txid).is_some_and(|s| s.all_prepared());
            let mut unresolved = Vec::new();
            for branch in branches {
                let xid = branch.xid;
                let answer = if commit {
                    call_with_timeout(&branch.rm, self.timeout, move |rm| rm.commit(xid, false))
                } else {
                    call_with_timeout(&branch.rm, self.timeout, move |rm| rm.rollback(xid))
                };
                let decision = match answer {
                    Answer::Done(Ok(())) => {
                        info!(
                            %xid,
                            resource = branch.name(),
                            decision = if commit { "commit" } else { "rollback" },
                            "recovered branch"
                        );
                        if commit {
                            report.committed.push(xid);
                            Decision::Committed
                        } else {
                            report.rolled_back.push(xid);
                            Decision::RolledBack
                        }
                    }
                    Answer::Done(Err(e)) => {
                        error!(%xid, resource = branch.name(), error = %e, "recovery of branch failed");
                        if commit {
                            self.log.append(&[LogEntry::new(
                                xid,
                                branch.name(),
                                Decision::HeuristicMixed,
                            )])?;
                        }
                        unresolved.push(branch);
                        continue;
                    }
                    Answer::TimedOut => {
                        warn!(%xid, resource = branch.name(), "recovery of branch timed out");
                        unresolved.push(branch);
                        continue;
                    }
                };
                self.log
                    .append(&[LogEntry::new(xid, branch.name(), decision)])?;
            }
            if !unresolved.is_empty() {
                let state = if commit {
                    TransactionState::HeuristicMixed
                } else {
                    TransactionState::RollingBack
                };
                in_doubt.push(Transaction::with_branches(txid, state, unresolved));
            }
        }

        let skipped: BTreeSet<&str> = report.skipped.iter().map(String::as_str).collect();
        let parked: BTreeSet<TransactionId> = in_doubt.iter().map(|tx| tx.id).collect();

        for (txid, summary) in self.log.unresolved() {
            if parked.contains(&txid) {
                continue;
            }
            self.observe_txid(txid);
            let mut branches = Vec::new();
            let mut open = false;
            for (name, xid) in &summary.enlisted {
                if let Some(rm) = self.registry.get(name) {
                    branches.push(Branch { rm, xid: *xid });
                }
                let reachable =
                    !skipped.contains(name.as_str()) && self.registry.get(name).is_some();
                if !reachable && !summary.is_settled(name) {
                    open = true;
                }
            }

            if summary.is_heuristic() || open {
                let state = if summary.is_heuristic() {
                    TransactionState::HeuristicMixed
                } else {
                    TransactionState::Committing
                };
                in_doubt.push(Transaction::with_branches(txid, state, branches));
                continue;
            }

            // No participant holds anything for this transaction: record the
            // outcome its log already implies so it counts as resolved.
            let decision = if summary.all_prepared() {
                Decision::Committed
            } else {
                Decision::RolledBack
            };
            let entries: Vec<LogEntry> = summary
                .enlisted
                .iter()
                .filter(|(name, _)| !summary.is_settled(name))
                .map(|(name, xid)| LogEntry::new(*xid, name.clone(), decision))
                .collect();
            self.log.append(&entries)?;
        }

        if let Some(highest) = self.log.highest_txid() {
            self.observe_txid(highest);
        }

        {
            let mut parked = self.in_doubt.lock();
            for tx in in_doubt {
                warn!(txid = %tx.id, state = %tx.state, "transaction in doubt after recovery");
                report.in_doubt.push(tx.id);
                parked.insert(tx.id, tx);
            }
        }

        if let Err(e) = self.log.rotate_if_idle(|| !self.in_doubt.lock().is_empty()) {
            warn!(error = %e, "recovery log rotation failed");
        }

        self.recovered.store(true, Ordering::SeqCst);
        info!(
            committed = report.committed.len(),
            rolled_back = report.rolled_back.len(),
            in_doubt = report.in_doubt.len(),
            skipped = report.skipped.len(),
            "recovery finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::resource::{EndFlags, ResourceRegistry, StartFlags, Vote};
    use crate::txlog::RecoveryLog;
    use parking_lot::Mutex;
    use ridgedb_storage::InMemoryBackend;

    /// Reports a fixed set of prepared branches and records outcomes.
    struct InDoubt {
        name: &'static str,
        prepared: Mutex<Vec<Xid>>,
        committed: Mutex<Vec<Xid>>,
        rolled_back: Mutex<Vec<Xid>>,
        broken: bool,
    }

    impl InDoubt {
        fn new(name: &'static str, prepared: Vec<Xid>) -> Arc<Self> {
            Arc::new(Self {
                name,
                prepared: Mutex::new(prepared),
                committed: Mutex::new(Vec::new()),
                rolled_back: Mutex::new(Vec::new()),
                broken: false,
            })
        }

        fn broken(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                prepared: Mutex::new(Vec::new()),
                committed: Mutex::new(Vec::new()),
                rolled_back: Mutex::new(Vec::new()),
                broken: true,
            })
        }
    }

    impl ResourceManager for InDoubt {
        fn name(&self) -> &str {
            self.name
        }
        fn start(&self, _: Xid, _: StartFlags) -> CoreResult<()> {
            Ok(())
        }
        fn end(&self, _: Xid, _: EndFlags) -> CoreResult<()> {
            Ok(())
        }
        fn prepare(&self, _: Xid) -> CoreResult<Vote> {
            Ok(Vote::Ok)
        }
        fn commit(&self, xid: Xid, _: bool) -> CoreResult<()> {
            self.prepared.lock().retain(|x| *x != xid);
            self.committed.lock().push(xid);
            Ok(())
        }
        fn rollback(&self, xid: Xid) -> CoreResult<()> {
            self.prepared.lock().retain(|x| *x != xid);
            self.rolled_back.lock().push(xid);
            Ok(())
        }
        fn recover(&self, _: RecoverFlags) -> CoreResult<Vec<Xid>> {
            if self.broken {
                return Err(CoreError::resource_failure(self.name, "journal unreadable"));
            }
            Ok(self.prepared.lock().clone())
        }
        fn forget(&self, _: Xid) -> CoreResult<()> {
            Ok(())
        }
    }

    fn xid(tx: u64, branch: u32) -> Xid {
        Xid::new(TransactionId::new(tx), branch)
    }

    fn log_with(entries: &[LogEntry]) -> Arc<RecoveryLog> {
        let log = RecoveryLog::open(Box::new(InMemoryBackend::new()), false, 1 << 20).unwrap();
        log.append(entries).unwrap();
        Arc::new(log)
    }

    fn manager(log: Arc<RecoveryLog>, rms: &[Arc<InDoubt>], config: &Config) -> TransactionManager {
        let registry = Arc::new(ResourceRegistry::new());
        for rm in rms {
            registry.register(rm.clone()).unwrap();
        }
        TransactionManager::new(log, registry, config)
    }

    #[test]
    fn fully_prepared_transaction_is_committed() {
        let log = log_with(&[
            LogEntry::new(xid(5, 0), "a", Decision::Enlisted),
            LogEntry::new(xid(5, 1), "b", Decision::Enlisted),
            LogEntry::new(xid(5, 0), "a", Decision::Prepared),
            LogEntry::new(xid(5, 1), "b", Decision::Prepared),
            LogEntry::new(xid(5, 0), "a", Decision::Committed),
        ]);
        let a = InDoubt::new("a", vec![]);
        let b = InDoubt::new("b", vec![xid(5, 1)]);
        let tm = manager(log, &[a.clone(), b.clone()], &Config::default());

        let report = tm.recover().unwrap();
        assert_eq!(report.committed, vec![xid(5, 1)]);
        assert_eq!(*b.committed.lock(), vec![xid(5, 1)]);
        assert!(tm.log().unresolved().is_empty());
        assert!(tm.begin().unwrap() > TransactionId::new(5));
    }

    #[test]
    fn partially_prepared_transaction_is_rolled_back() {
        let log = log_with(&[
            LogEntry::new(xid(2, 0), "a", Decision::Enlisted),
            LogEntry::new(xid(2, 1), "b", Decision::Enlisted),
            LogEntry::new(xid(2, 0), "a", Decision::Prepared),
        ]);
        let a = InDoubt::new("a", vec![xid(2, 0)]);
        let b = InDoubt::new("b", vec![]);
        let tm = manager(log, &[a.clone(), b], &Config::default());

        let report = tm.recover().unwrap();
        assert_eq!(report.rolled_back, vec![xid(2, 0)]);
        assert!(a.committed.lock().is_empty());
    }

    #[test]
    fn unknown_transaction_is_rolled_back() {
        let a = InDoubt::new("a", vec![xid(9, 0)]);
        let tm = manager(log_with(&[]), &[a.clone()], &Config::default());
        let report = tm.recover().unwrap();
        assert_eq!(report.rolled_back, vec![xid(9, 0)]);
        assert_eq!(tm.begin().unwrap(), TransactionId::new(10));
    }

    #[test]
    fn log_only_transaction_is_settled() {
        let log = log_with(&[
            LogEntry::new(xid(3, 0), "a", Decision::Enlisted),
            LogEntry::new(xid(3, 1), "b", Decision::Enlisted),
            LogEntry::new(xid(3, 0), "a", Decision::Prepared),
        ]);
        let tm = manager(
            log,
            &[InDoubt::new("a", vec![]), InDoubt::new("b", vec![])],
            &Config::default(),
        );
        assert!(tm.recover().unwrap().is_empty());
        assert!(tm.log().unresolved().is_empty());
    }

    #[test]
    fn broken_participant_blocks_startup() {
        let tm = manager(log_with(&[]), &[InDoubt::broken("a")], &Config::default());
        assert!(matches!(tm.recover(), Err(CoreError::RecoveryFailed { .. })));
        assert!(matches!(tm.begin(), Err(CoreError::RecoveryIncomplete)));
    }

    #[test]
    fn forced_recovery_skips_broken_participant() {
        let config = Config::default().force_recovery(true);
        let tm = manager(log_with(&[]), &[InDoubt::broken("a")], &config);
        let report = tm.recover().unwrap();
        assert_eq!(report.skipped, vec!["a"]);
        assert!(tm.begin().is_ok());
    }

    #[test]
    fn heuristic_transaction_stays_in_doubt() {
        let log = log_with(&[
            LogEntry::new(xid(4, 0), "a", Decision::Enlisted),
            LogEntry::new(xid(4, 1), "b", Decision::Enlisted),
            LogEntry::new(xid(4, 0), "a", Decision::Prepared),
            LogEntry::new(xid(4, 1), "b", Decision::Prepared),
            LogEntry::new(xid(4, 0), "a", Decision::Committed),
            LogEntry::new(xid(4, 1), "b", Decision::HeuristicMixed),
        ]);
        let tm = manager(
            log,
            &[InDoubt::new("a", vec![]), InDoubt::new("b", vec![])],
            &Config::default(),
        );
        let report = tm.recover().unwrap();
        assert_eq!(report.in_doubt, vec![TransactionId::new(4)]);
        assert_eq!(tm.state(TransactionId::new(4)), Some(TransactionState::HeuristicMixed));

        tm.forget(TransactionId::new(4)).unwrap();
        assert!(tm.in_doubt().is_empty());
        assert!(tm.log().unresolved().is_empty());
    }
}
