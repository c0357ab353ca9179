//! The resource-manager contract.
//!
//! Every physical store takes part in transactions as a participant that
//! implements [`ResourceManager`]. The coordinator drives one branch per
//! participant through:
//!
//! ```text
//! start ─► end ─► prepare ─► commit / rollback ─► (forget)
//!                    │
//!                    └─ one participant only: commit(one_phase = true)
//! ```
//!
//! Participants must treat re-delivery of `commit`, `rollback` and
//! `forget` for a branch they already resolved as a no-op.

mod journaled;
mod registry;

pub use journaled::{JournalRecord, JournaledResource, StoreState};
pub use registry::ResourceRegistry;

use crate::error::CoreResult;
use crate::types::Xid;

/// How a branch is associated by `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFlags {
    /// Begin a new branch.
    New,
    /// Continue a branch already started on the same participant.
    Join,
}

/// How work on a branch is finished by `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndFlags {
    /// The work completed normally.
    Success,
    /// The coordinator is aborting; the branch may only roll back.
    Fail,
}

/// Scan position for `recover`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverFlags {
    /// Start a scan.
    StartScan,
    /// End a scan.
    EndScan,
    /// Return everything in one call.
    Full,
}

/// A participant's answer to `prepare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    /// Changes are durable; commit cannot fail for checkable reasons.
    Ok,
    /// The branch changed nothing and is already resolved.
    ReadOnly,
    /// The branch cannot commit and has been rolled back.
    RollbackOnly,
}

/// A participant in two-phase commit.
///
/// Implementations must be safe to call from several threads for
/// different branches at once.
pub trait ResourceManager: Send + Sync {
    /// Stable name identifying this participant.
    fn name(&self) -> &str;

    /// Associates work with a branch.
    ///
    /// # Errors
    ///
    /// `ProtocolViolation` if `New` names an existing branch or `Join`
    /// names an unknown one.
    fn start(&self, xid: Xid, flags: StartFlags) -> CoreResult<()>;

    /// Ends the work on a branch.
    ///
    /// # Errors
    ///
    /// `ProtocolViolation` if the branch was never started.
    fn end(&self, xid: Xid, flags: EndFlags) -> CoreResult<()>;

    /// Makes the branch's changes durable and votes.
    ///
    /// # Errors
    ///
    /// `ProtocolViolation` for an unknown or already prepared branch;
    /// any other error counts as a veto.
    fn prepare(&self, xid: Xid) -> CoreResult<Vote>;

    /// Applies the branch. `one_phase` skips the prepare requirement.
    ///
    /// # Errors
    ///
    /// `ProtocolViolation` for a branch never started; `ResourceFailure`
    /// when the change cannot be made durable.
    fn commit(&self, xid: Xid, one_phase: bool) -> CoreResult<()>;

    /// Discards the branch.
    ///
    /// # Errors
    ///
    /// `ProtocolViolation` for a branch never started.
    fn rollback(&self, xid: Xid) -> CoreResult<()>;

    /// Lists branches that are prepared but not yet resolved.
    ///
    /// # Errors
    ///
    /// Any error makes startup recovery fail.
    fn recover(&self, flags: RecoverFlags) -> CoreResult<Vec<Xid>>;

    /// Drops bookkeeping for a resolved branch.
    ///
    /// # Errors
    ///
    /// `ProtocolViolation` if the branch is still live.
    fn forget(&self, xid: Xid) -> CoreResult<()>;

    /// Whether `other` is the same participant, compared by name.
    fn is_same_rm(&self, other: &dyn ResourceManager) -> bool {
        self.name() == other.name()
    }
}
