//! Entity locking.
//!
//! Isolation between transactions is the lock manager's job; the stores
//! only assume that two transactions never mutate the same entity at once.
//! [`LocalLockManager`] is an in-process implementation that never blocks
//! the caller: a conflicting request is answered with
//! [`LockOutcome::Blocked`] and remembered as a wait, so that a later
//! request closing a cycle is answered with [`LockOutcome::Deadlock`].

use crate::error::CoreResult;
use crate::types::{EntityRef, TransactionId};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Lock strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockMode {
    /// Compatible with other shared holders.
    Shared,
    /// Excludes every other holder.
    Exclusive,
}

/// Answer to a lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// The lock is held by the requester.
    Granted,
    /// Another transaction holds a conflicting lock.
    Blocked,
    /// Waiting would close a cycle of waiting transactions.
    Deadlock,
}

/// Acquire/release semantics consumed by the mutation paths.
pub trait LockManager: Send + Sync {
    /// Requests `mode` on `entity` for `owner`.
    ///
    /// # Errors
    ///
    /// Implementations backed by external services may fail.
    fn acquire(
        &self,
        owner: TransactionId,
        entity: EntityRef,
        mode: LockMode,
    ) -> CoreResult<LockOutcome>;

    /// Releases one lock.
    fn release(&self, owner: TransactionId, entity: EntityRef);

    /// Releases every lock held by `owner` and forgets its waits.
    fn release_all(&self, owner: TransactionId);
}

#[derive(Debug)]
struct Held {
    mode: LockMode,
    owners: BTreeSet<TransactionId>,
}

#[derive(Debug, Default)]
struct LockTable {
    held: HashMap<EntityRef, Held>,
    /// What each blocked transaction last asked for.
    waiting: HashMap<TransactionId, EntityRef>,
}

impl LockTable {
    fn compatible(&self, owner: TransactionId, entity: EntityRef, mode: LockMode) -> bool {
        match self.held.get(&entity) {
            None => true,
            Some(held) => {
                let others = held.owners.iter().any(|o| *o != owner);
                !others || (mode == LockMode::Shared && held.mode == LockMode::Shared)
            }
        }
    }

    /// Whether `owner` waiting on `entity` would wait on itself.
    fn closes_cycle(&self, owner: TransactionId, entity: EntityRef) -> bool {
        let mut visited = HashSet::new();
        let mut frontier = vec![entity];
        while let Some(e) = frontier.pop() {
            let Some(held) = self.held.get(&e) else {
                continue;
            };
            for holder in &held.owners {
                if *holder == owner {
                    if e != entity {
                        return true;
                    }
                    continue;
                }
                if visited.insert(*holder) {
                    if let Some(next) = self.waiting.get(holder) {
                        frontier.push(*next);
                    }
                }
            }
        }
        false
    }
}

/// In-process lock table.
#[derive(Debug, Default)]
pub struct LocalLockManager {
    table: Mutex<LockTable>,
}

impl LocalLockManager {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entities currently locked by `owner`.
    #[must_use]
    pub fn held_by(&self, owner: TransactionId) -> Vec<EntityRef> {
        let mut held: Vec<EntityRef> = self
            .table
            .lock()
            .held
            .iter()
            .filter(|(_, h)| h.owners.contains(&owner))
            .map(|(e, _)| *e)
            .collect();
        held.sort();
        held
    }
}

impl LockManager for LocalLockManager {
    fn acquire(
        &self,
        owner: TransactionId,
        entity: EntityRef,
        mode: LockMode,
    ) -> CoreResult<LockOutcome> {
        let mut table = self.table.lock();
        if !table.compatible(owner, entity, mode) {
            if table.closes_cycle(owner, entity) {
                table.waiting.remove(&owner);
                return Ok(LockOutcome::Deadlock);
            }
            table.waiting.insert(owner, entity);
            return Ok(LockOutcome::Blocked);
        }

        table.waiting.remove(&owner);
        let held = table.held.entry(entity).or_insert_with(|| Held {
            mode,
            owners: BTreeSet::new(),
        });
        held.owners.insert(owner);
        held.mode = held.mode.max(mode);
        Ok(LockOutcome::Granted)
    }

    fn release(&self, owner: TransactionId, entity: EntityRef) {
        let mut guard = self.table.lock();
        let table = &mut *guard;
        let emptied = table.held.get_mut(&entity).is_some_and(|held| {
            held.owners.remove(&owner);
            held.owners.is_empty()
        });
        if emptied {
            table.held.remove(&entity);
        }
    }

    fn release_all(&self, owner: TransactionId) {
        let mut table = self.table.lock();
        table.waiting.remove(&owner);
        table.held.retain(|_, held| {
            held.owners.remove(&owner);
            !held.owners.is_empty()
        });
    }
}
