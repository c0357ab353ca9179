//! A scripted participant for coordinator tests.
//!
//! [`RecordingResource`] follows the branch protocol well enough for the
//! coordinator to drive it, records every call it receives, and can be told
//! to veto, fail or stall at a chosen step. Its prepared branches survive
//! [`restart`](RecordingResource::restart), so the same instance can stand
//! in for a participant across a simulated crash.

use parking_lot::Mutex;
use ridgedb_core::{
    CoreError, CoreResult, EndFlags, RecoverFlags, ResourceManager, StartFlags, Vote, Xid,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// A protocol step a script can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    /// `start`.
    Start,
    /// `end`.
    End,
    /// `prepare`.
    Prepare,
    /// `commit`.
    Commit,
    /// `rollback`.
    Rollback,
    /// `recover`.
    Recover,
    /// `forget`.
    Forget,
}

/// One recorded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    /// `start(xid, flags)`.
    Start(Xid, StartFlags),
    /// `end(xid, flags)`.
    End(Xid, EndFlags),
    /// `prepare(xid)`.
    Prepare(Xid),
    /// `commit(xid, one_phase)`.
    Commit(Xid, bool),
    /// `rollback(xid)`.
    Rollback(Xid),
    /// `recover(flags)`.
    Recover(RecoverFlags),
    /// `forget(xid)`.
    Forget(Xid),
}

impl Call {
    /// The step this call belongs to.
    #[must_use]
    pub fn step(&self) -> Step {
        match self {
            Self::Start(..) => Step::Start,
            Self::End(..) => Step::End,
            Self::Prepare(_) => Step::Prepare,
            Self::Commit(..) => Step::Commit,
            Self::Rollback(_) => Step::Rollback,
            Self::Recover(_) => Step::Recover,
            Self::Forget(_) => Step::Forget,
        }
    }
}

#[derive(Debug, Default)]
struct Script {
    vote: Option<Vote>,
    fail: BTreeSet<Step>,
    hang: Option<(Step, Duration)>,
}

#[derive(Debug, Default)]
struct Branches {
    live: BTreeSet<Xid>,
    prepared: BTreeSet<Xid>,
    committed: BTreeSet<Xid>,
    rolled_back: BTreeSet<Xid>,
}

/// A participant whose answers are scripted.
#[derive(Debug)]
pub struct RecordingResource {
    name: String,
    script: Mutex<Script>,
    calls: Mutex<Vec<Call>>,
    branches: Mutex<Branches>,
}

impl RecordingResource {
    /// Creates a participant that votes `Ok` and never fails.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            script: Mutex::new(Script::default()),
            calls: Mutex::new(Vec::new()),
            branches: Mutex::new(Branches::default()),
        })
    }

    /// Answers `prepare` with `vote`.
    pub fn vote(&self, vote: Vote) -> &Self {
        self.script.lock().vote = Some(vote);
        self
    }

    /// Makes every call of `step` fail with a resource failure.
    pub fn fail_on(&self, step: Step) -> &Self {
        self.script.lock().fail.insert(step);
        self
    }

    /// Makes calls of `step` sleep for `delay` before answering.
    pub fn hang_on(&self, step: Step, delay: Duration) -> &Self {
        self.script.lock().hang = Some((step, delay));
        self
    }

    /// Clears every scripted behavior.
    pub fn heal(&self) -> &Self {
        *self.script.lock() = Script::default();
        self
    }

    /// Simulates a restart: forgets live branches and recorded calls but
    /// keeps prepared ones, like a participant with a durable journal.
    pub fn restart(&self) {
        self.calls.lock().clear();
        let mut branches = self.branches.lock();
        let prepared = std::mem::take(&mut branches.prepared);
        *branches = Branches {
            prepared,
            ..Branches::default()
        };
    }

    /// Every call received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// The steps received so far, in order.
    #[must_use]
    pub fn steps(&self) -> Vec<Step> {
        self.calls.lock().iter().map(Call::step).collect()
    }

    /// How many calls of `step` were received.
    #[must_use]
    pub fn count(&self, step: Step) -> usize {
        self.calls.lock().iter().filter(|c| c.step() == step).count()
    }

    /// Branches prepared and not yet resolved.
    #[must_use]
    pub fn prepared(&self) -> Vec<Xid> {
        self.branches.lock().prepared.iter().copied().collect()
    }

    /// Branches committed.
    #[must_use]
    pub fn committed(&self) -> Vec<Xid> {
        self.branches.lock().committed.iter().copied().collect()
    }

    /// Branches rolled back.
    #[must_use]
    pub fn rolled_back(&self) -> Vec<Xid> {
        self.branches.lock().rolled_back.iter().copied().collect()
    }

    fn enter(&self, call: Call) -> CoreResult<()> {
        self.calls.lock().push(call);
        let (fails, hang) = {
            let script = self.script.lock();
            (script.fail.contains(&call.step()), script.hang)
        };
        if let Some((step, delay)) = hang {
            if step == call.step() {
                thread::sleep(delay);
            }
        }
        if fails {
            return Err(CoreError::resource_failure(
                &self.name,
                format!("scripted failure in {:?}", call.step()),
            ));
        }
        Ok(())
    }

    fn resolved(&self, xid: Xid) -> bool {
        let branches = self.branches.lock();
        branches.committed.contains(&xid) || branches.rolled_back.contains(&xid)
    }
}

impl ResourceManager for RecordingResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self, xid: Xid, flags: StartFlags) -> CoreResult<()> {
        self.enter(Call::Start(xid, flags))?;
        let mut branches = self.branches.lock();
        match flags {
            StartFlags::New if !branches.live.insert(xid) => Err(CoreError::protocol_violation(
                &self.name,
                format!("branch {xid} already started"),
            )),
            StartFlags::Join if !branches.live.contains(&xid) => Err(
                CoreError::protocol_violation(&self.name, format!("branch {xid} unknown")),
            ),
            _ => Ok(()),
        }
    }

    fn end(&self, xid: Xid, flags: EndFlags) -> CoreResult<()> {
        self.enter(Call::End(xid, flags))
    }

    fn prepare(&self, xid: Xid) -> CoreResult<Vote> {
        self.enter(Call::Prepare(xid))?;
        let vote = self.script.lock().vote.unwrap_or(Vote::Ok);
        let mut branches = self.branches.lock();
        branches.live.remove(&xid);
        match vote {
            Vote::Ok => {
                branches.prepared.insert(xid);
            }
            Vote::ReadOnly => {
                branches.committed.insert(xid);
            }
            Vote::RollbackOnly => {
                branches.rolled_back.insert(xid);
            }
        }
        Ok(vote)
    }

    fn commit(&self, xid: Xid, one_phase: bool) -> CoreResult<()> {
        self.enter(Call::Commit(xid, one_phase))?;
        if self.resolved(xid) {
            return Ok(());
        }
        let mut branches = self.branches.lock();
        let known = branches.prepared.remove(&xid) | (one_phase && branches.live.remove(&xid));
        if !known {
            return Err(CoreError::protocol_violation(
                &self.name,
                format!("branch {xid} is not prepared"),
            ));
        }
        branches.committed.insert(xid);
        Ok(())
    }

    fn rollback(&self, xid: Xid) -> CoreResult<()> {
        self.enter(Call::Rollback(xid))?;
        if self.resolved(xid) {
            return Ok(());
        }
        let mut branches = self.branches.lock();
        let known = branches.prepared.remove(&xid) | branches.live.remove(&xid);
        if known {
            branches.rolled_back.insert(xid);
        }
        Ok(())
    }

    fn recover(&self, flags: RecoverFlags) -> CoreResult<Vec<Xid>> {
        self.enter(Call::Recover(flags))?;
        Ok(self.prepared())
    }

    fn forget(&self, xid: Xid) -> CoreResult<()> {
        self.enter(Call::Forget(xid))?;
        let mut branches = self.branches.lock();
        branches.prepared.remove(&xid);
        branches.live.remove(&xid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridgedb_core::TransactionId;

    fn xid(n: u64) -> Xid {
        Xid::new(TransactionId::new(n), 0)
    }

    #[test]
    fn records_and_tracks_branches() {
        let rm = RecordingResource::new("rec");
        rm.start(xid(1), StartFlags::New).unwrap();
        rm.end(xid(1), EndFlags::Success).unwrap();
        assert_eq!(rm.prepare(xid(1)).unwrap(), Vote::Ok);
        assert_eq!(rm.prepared(), vec![xid(1)]);

        rm.restart();
        assert_eq!(rm.recover(RecoverFlags::Full).unwrap(), vec![xid(1)]);
        rm.commit(xid(1), false).unwrap();
        rm.commit(xid(1), false).unwrap();
        assert_eq!(rm.committed(), vec![xid(1)]);
        assert_eq!(rm.steps(), vec![Step::Recover, Step::Commit, Step::Commit]);
    }

    #[test]
    fn scripted_failure() {
        let rm = RecordingResource::new("rec");
        rm.fail_on(Step::Prepare);
        rm.start(xid(2), StartFlags::New).unwrap();
        assert!(rm.prepare(xid(2)).is_err());
        rm.heal();
        assert!(rm.prepare(xid(2)).is_ok());
    }

    #[test]
    fn commit_of_unknown_branch_is_a_violation() {
        let rm = RecordingResource::new("rec");
        assert!(rm.commit(xid(3), false).unwrap_err().is_protocol_violation());
    }
}
