//! Transaction state.

use crate::resource::ResourceManager;
use crate::types::{TransactionId, Xid};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Work is being done and participants may enlist.
    Active,
    /// Participants are being asked to prepare.
    Preparing,
    /// Every participant voted to commit.
    Prepared,
    /// Commit was decided and is being delivered.
    Committing,
    /// Every participant committed.
    Committed,
    /// Participants are being rolled back.
    RollingBack,
    /// Every participant rolled back.
    RolledBack,
    /// Some participants committed and others did not.
    HeuristicMixed,
}

impl TransactionState {
    /// Whether the transaction has reached a final outcome.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }

    /// Lowercase name for diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Preparing => "preparing",
            Self::Prepared => "prepared",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::RollingBack => "rolling_back",
            Self::RolledBack => "rolled_back",
            Self::HeuristicMixed => "heuristic_mixed",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One participant's branch of a transaction.
#[derive(Clone)]
pub(crate) struct Branch {
    pub(crate) rm: Arc<dyn ResourceManager>,
    pub(crate) xid: Xid,
}

impl Branch {
    pub(crate) fn name(&self) -> &str {
        self.rm.name()
    }
}

impl fmt::Debug for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Branch")
            .field("resource", &self.rm.name())
            .field("xid", &self.xid)
            .finish()
    }
}

/// Coordinator-side record of one transaction.
#[derive(Debug)]
pub(crate) struct Transaction {
    pub(crate) id: TransactionId,
    pub(crate) state: TransactionState,
    /// Enlisted branches in enlistment order.
    pub(crate) branches: Vec<Branch>,
    pub(crate) rollback_only: bool,
    pub(crate) started: Instant,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            branches: Vec::new(),
            rollback_only: false,
            started: Instant::now(),
        }
    }

    pub(crate) fn with_branches(
        id: TransactionId,
        state: TransactionState,
        branches: Vec<Branch>,
    ) -> Self {
        Self {
            id,
            state,
            branches,
            rollback_only: false,
            started: Instant::now(),
        }
    }

    pub(crate) fn info(&self) -> TransactionInfo {
        TransactionInfo {
            txid: self.id,
            state: self.state,
            resources: self.branches.iter().map(|b| b.name().to_string()).collect(),
            elapsed: self.started.elapsed(),
        }
    }
}

/// A snapshot of a transaction the coordinator still tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    /// The transaction.
    pub txid: TransactionId,
    /// Its state.
    pub state: TransactionState,
    /// Enlisted participants in enlistment order.
    pub resources: Vec<String>,
    /// Time since the transaction began.
    pub elapsed: Duration,
}
