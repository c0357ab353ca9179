//! Node store.

use crate::error::{CoreError, CoreResult};
use crate::log::PayloadReader;
use crate::resource::{JournaledResource, StoreState};
use crate::types::{NodeId, TransactionId, Xid};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// A staged node mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeChange {
    /// The node comes into existence.
    Create(NodeId),
    /// The node is removed.
    Delete(NodeId),
}

/// Committed node ids.
#[derive(Debug, Default)]
pub struct NodeState {
    nodes: BTreeSet<NodeId>,
    next_id: AtomicU64,
}

impl NodeState {
    /// Creates an empty node set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out a fresh node id.
    ///
    /// Ids are never reused, even when the transaction that took one
    /// rolls back.
    pub fn allocate(&self) -> NodeId {
        NodeId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Whether a committed node exists.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(&id)
    }

    /// Number of committed nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node is committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Committed node ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }

    /// Whether `id` exists once `pending` is applied on top of this state.
    #[must_use]
    pub fn visible(&self, pending: &[NodeChange], id: NodeId) -> bool {
        pending.iter().fold(self.contains(id), |exists, change| match change {
            NodeChange::Create(n) if *n == id => true,
            NodeChange::Delete(n) if *n == id => false,
            _ => exists,
        })
    }

    fn bump(&self, id: NodeId) {
        self.next_id.fetch_max(id.0 + 1, Ordering::SeqCst);
    }
}

impl StoreState for NodeState {
    type Change = NodeChange;

    fn encode_change(change: &NodeChange, buf: &mut Vec<u8>) {
        let (tag, id) = match change {
            NodeChange::Create(id) => (1u8, id.0),
            NodeChange::Delete(id) => (2u8, id.0),
        };
        buf.push(tag);
        buf.extend_from_slice(&id.to_le_bytes());
    }

    fn decode_change(reader: &mut PayloadReader<'_>) -> CoreResult<NodeChange> {
        let tag = reader.u8()?;
        let id = NodeId(reader.u64()?);
        match tag {
            1 => Ok(NodeChange::Create(id)),
            2 => Ok(NodeChange::Delete(id)),
            other => Err(CoreError::log_corruption(format!(
                "unknown node change tag: {other}"
            ))),
        }
    }

    fn check(&self, _xid: Xid, changes: &[NodeChange]) -> CoreResult<()> {
        for (i, change) in changes.iter().enumerate() {
            let before = &changes[..i];
            match change {
                NodeChange::Create(id) if self.visible(before, *id) => {
                    return Err(CoreError::invalid_operation(format!("{id} already exists")));
                }
                NodeChange::Delete(id) if !self.visible(before, *id) => {
                    return Err(CoreError::not_found(id.to_string()));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn apply(&mut self, changes: &[NodeChange]) -> CoreResult<()> {
        for change in changes {
            match change {
                NodeChange::Create(id) => {
                    self.nodes.insert(*id);
                    self.bump(*id);
                }
                NodeChange::Delete(id) => {
                    self.nodes.remove(id);
                    self.bump(*id);
                }
            }
        }
        Ok(())
    }

    fn snapshot(&mut self) -> CoreResult<Vec<NodeChange>> {
        let mut changes: Vec<NodeChange> = self.ids().map(NodeChange::Create).collect();
        // Deleting the last handed-out id carries the id watermark.
        if let Some(last) = self.next_id.load(Ordering::SeqCst).checked_sub(1) {
            if !self.contains(NodeId(last)) {
                changes.push(NodeChange::Delete(NodeId(last)));
            }
        }
        Ok(changes)
    }

    fn restore_in_doubt(&mut self, changes: &[NodeChange]) -> CoreResult<()> {
        for change in changes {
            let (NodeChange::Create(id) | NodeChange::Delete(id)) = change;
            self.bump(*id);
        }
        Ok(())
    }
}

/// The node store participant.
pub type NodeStore = JournaledResource<NodeState>;

impl NodeStore {
    /// Whether `id` exists as seen by transaction `txid`.
    #[must_use]
    pub fn exists_for(&self, txid: TransactionId, id: NodeId) -> bool {
        self.inspect_branch(txid, |state, pending| state.visible(pending, id))
    }
}
