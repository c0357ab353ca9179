//! Relationship store.

use crate::error::{CoreError, CoreResult};
use crate::log::PayloadReader;
use crate::resource::{JournaledResource, StoreState};
use crate::store::NodeStore;
use crate::types::{NodeId, RelationshipId, TransactionId, Xid};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A directed, typed edge between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipRecord {
    /// Source node.
    pub start: NodeId,
    /// Target node.
    pub end: NodeId,
    /// Application-defined relationship type.
    pub rel_type: u32,
}

/// A staged relationship mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipChange {
    /// A new relationship.
    Create(RelationshipId, RelationshipRecord),
    /// Removal of a relationship.
    Delete(RelationshipId),
}

impl RelationshipChange {
    fn id(&self) -> RelationshipId {
        match self {
            Self::Create(id, _) | Self::Delete(id) => *id,
        }
    }
}

/// Committed relationships plus a per-node adjacency index.
pub struct RelationshipState {
    records: BTreeMap<RelationshipId, RelationshipRecord>,
    by_node: BTreeMap<NodeId, BTreeSet<RelationshipId>>,
    next_id: AtomicU64,
    nodes: Arc<NodeStore>,
}

impl RelationshipState {
    /// Creates an empty store that validates endpoints against `nodes`.
    #[must_use]
    pub fn new(nodes: Arc<NodeStore>) -> Self {
        Self {
            records: BTreeMap::new(),
            by_node: BTreeMap::new(),
            next_id: AtomicU64::new(0),
            nodes,
        }
    }

    /// Hands out a fresh relationship id.
    pub fn allocate(&self) -> RelationshipId {
        RelationshipId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Returns a committed relationship.
    #[must_use]
    pub fn get(&self, id: RelationshipId) -> Option<RelationshipRecord> {
        self.records.get(&id).copied()
    }

    /// Number of committed relationships.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no relationship is committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Committed relationships touching `node`.
    #[must_use]
    pub fn relationships_of(&self, node: NodeId) -> Vec<RelationshipId> {
        self.by_node
            .get(&node)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Relationships touching `node` once `pending` is applied.
    #[must_use]
    pub fn visible_relationships_of(
        &self,
        pending: &[RelationshipChange],
        node: NodeId,
    ) -> BTreeSet<RelationshipId> {
        let mut out: BTreeSet<RelationshipId> =
            self.by_node.get(&node).cloned().unwrap_or_default();
        for change in pending {
            match change {
                RelationshipChange::Create(id, r) if r.start == node || r.end == node => {
                    out.insert(*id);
                }
                RelationshipChange::Delete(id) => {
                    out.remove(id);
                }
                _ => {}
            }
        }
        out
    }

    /// Returns `id` as seen once `pending` is applied.
    #[must_use]
    pub fn visible(
        &self,
        pending: &[RelationshipChange],
        id: RelationshipId,
    ) -> Option<RelationshipRecord> {
        pending
            .iter()
            .filter(|c| c.id() == id)
            .fold(self.get(id), |current, change| match change {
                RelationshipChange::Create(_, r) => Some(*r),
                RelationshipChange::Delete(_) => None,
            })
    }

    fn link(&mut self, id: RelationshipId, record: RelationshipRecord) {
        self.by_node.entry(record.start).or_default().insert(id);
        self.by_node.entry(record.end).or_default().insert(id);
    }

    fn unlink(&mut self, id: RelationshipId, record: RelationshipRecord) {
        for node in [record.start, record.end] {
            if let Some(set) = self.by_node.get_mut(&node) {
                set.remove(&id);
                if set.is_empty() {
                    self.by_node.remove(&node);
                }
            }
        }
    }

    fn bump(&self, id: RelationshipId) {
        self.next_id.fetch_max(id.0 + 1, Ordering::SeqCst);
    }
}

impl fmt::Debug for RelationshipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationshipState")
            .field("relationships", &self.records.len())
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl StoreState for RelationshipState {
    type Change = RelationshipChange;

    fn encode_change(change: &RelationshipChange, buf: &mut Vec<u8>) {
        match change {
            RelationshipChange::Create(id, r) => {
                buf.push(1);
                buf.extend_from_slice(&id.0.to_le_bytes());
                buf.extend_from_slice(&r.start.0.to_le_bytes());
                buf.extend_from_slice(&r.end.0.to_le_bytes());
                buf.extend_from_slice(&r.rel_type.to_le_bytes());
            }
            RelationshipChange::Delete(id) => {
                buf.push(2);
                buf.extend_from_slice(&id.0.to_le_bytes());
            }
        }
    }

    fn decode_change(reader: &mut PayloadReader<'_>) -> CoreResult<RelationshipChange> {
        let tag = reader.u8()?;
        let id = RelationshipId(reader.u64()?);
        match tag {
            1 => Ok(RelationshipChange::Create(
                id,
                RelationshipRecord {
                    start: NodeId(reader.u64()?),
                    end: NodeId(reader.u64()?),
                    rel_type: reader.u32()?,
                },
            )),
            2 => Ok(RelationshipChange::Delete(id)),
            other => Err(CoreError::log_corruption(format!(
                "unknown relationship change tag: {other}"
            ))),
        }
    }

    fn check(&self, xid: Xid, changes: &[RelationshipChange]) -> CoreResult<()> {
        for (i, change) in changes.iter().enumerate() {
            let before = &changes[..i];
            match change {
                RelationshipChange::Create(id, r) => {
                    if self.visible(before, *id).is_some() {
                        return Err(CoreError::invalid_operation(format!("{id} already exists")));
                    }
                    for node in [r.start, r.end] {
                        if !self.nodes.exists_for(xid.global, node) {
                            return Err(CoreError::invalid_operation(format!(
                                "{id} refers to missing {node}"
                            )));
                        }
                    }
                }
                RelationshipChange::Delete(id) => {
                    if self.visible(before, *id).is_none() {
                        return Err(CoreError::not_found(id.to_string()));
                    }
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, changes: &[RelationshipChange]) -> CoreResult<()> {
        for change in changes {
            match change {
                RelationshipChange::Create(id, r) => {
                    if let Some(old) = self.records.insert(*id, *r) {
                        self.unlink(*id, old);
                    }
                    self.link(*id, *r);
                }
                RelationshipChange::Delete(id) => {
                    if let Some(old) = self.records.remove(id) {
                        self.unlink(*id, old);
                    }
                }
            }
            self.bump(change.id());
        }
        Ok(())
    }

    fn snapshot(&mut self) -> CoreResult<Vec<RelationshipChange>> {
        let mut changes: Vec<RelationshipChange> = self
            .records
            .iter()
            .map(|(id, r)| RelationshipChange::Create(*id, *r))
            .collect();
        if let Some(last) = self.next_id.load(Ordering::SeqCst).checked_sub(1) {
            let last = RelationshipId(last);
            if !self.records.contains_key(&last) {
                changes.push(RelationshipChange::Delete(last));
            }
        }
        Ok(changes)
    }

    fn restore_in_doubt(&mut self, changes: &[RelationshipChange]) -> CoreResult<()> {
        for change in changes {
            self.bump(change.id());
        }
        Ok(())
    }
}

/// The relationship store participant.
pub type RelationshipStore = JournaledResource<RelationshipState>;

impl RelationshipStore {
    /// Returns `id` as seen by transaction `txid`.
    #[must_use]
    pub fn get_for(&self, txid: TransactionId, id: RelationshipId) -> Option<RelationshipRecord> {
        self.inspect_branch(txid, |state, pending| state.visible(pending, id))
    }

    /// Relationships touching `node` as seen by transaction `txid`.
    #[must_use]
    pub fn relationships_for(&self, txid: TransactionId, node: NodeId) -> BTreeSet<RelationshipId> {
        self.inspect_branch(txid, |state, pending| {
            state.visible_relationships_of(pending, node)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{EndFlags, ResourceManager, StartFlags};
    use crate::store::{NodeChange, NodeState};
    use ridgedb_storage::InMemoryBackend;

    fn stores() -> (Arc<NodeStore>, RelationshipStore) {
        let nodes = Arc::new(
            NodeStore::open("nodes", Box::new(InMemoryBackend::new()), NodeState::new(), false)
                .unwrap(),
        );
        let rels = RelationshipStore::open(
            "rels",
            Box::new(InMemoryBackend::new()),
            RelationshipState::new(Arc::clone(&nodes)),
            false,
        )
        .unwrap();
        (nodes, rels)
    }

    fn branch<R: ResourceManager + ?Sized>(rm: &R, tx: u64, branch: u32) -> Xid {
        let xid = Xid::new(TransactionId::new(tx), branch);
        rm.start(xid, StartFlags::New).unwrap();
        xid
    }

    fn edge(start: u64, end: u64) -> RelationshipRecord {
        RelationshipRecord {
            start: NodeId(start),
            end: NodeId(end),
            rel_type: 3,
        }
    }

    #[test]
    fn endpoints_may_come_from_the_same_transaction() {
        let (nodes, rels) = stores();
        let nx = branch(nodes.as_ref(), 1, 0);
        nodes.stage(nx, NodeChange::Create(NodeId(0))).unwrap();
        nodes.stage(nx, NodeChange::Create(NodeId(1))).unwrap();
        nodes.end(nx, EndFlags::Success).unwrap();

        let rx = branch(&rels, 1, 1);
        rels.stage(rx, RelationshipChange::Create(RelationshipId(0), edge(0, 1)))
            .unwrap();
        rels.end(rx, EndFlags::Success).unwrap();

        nodes.prepare(nx).unwrap();
        rels.prepare(rx).unwrap();
        nodes.commit(nx, false).unwrap();
        rels.commit(rx, false).unwrap();

        assert_eq!(rels.read(|r| r.get(RelationshipId(0))), Some(edge(0, 1)));
        assert_eq!(
            rels.read(|r| r.relationships_of(NodeId(1))),
            vec![RelationshipId(0)]
        );
    }

    #[test]
    fn missing_endpoint_is_rejected_at_prepare() {
        let (_nodes, rels) = stores();
        let rx = branch(&rels, 1, 0);
        rels.stage(rx, RelationshipChange::Create(RelationshipId(0), edge(0, 9)))
            .unwrap();
        rels.end(rx, EndFlags::Success).unwrap();
        assert!(rels.prepare(rx).is_err());
        assert!(rels.read(RelationshipState::is_empty));
    }

    #[test]
    fn delete_unlinks_adjacency() {
        let (nodes, rels) = stores();
        let nx = branch(nodes.as_ref(), 1, 0);
        nodes.stage(nx, NodeChange::Create(NodeId(0))).unwrap();
        nodes.end(nx, EndFlags::Success).unwrap();
        nodes.commit(nx, true).unwrap();

        let rx = branch(&rels, 2, 0);
        rels.stage(rx, RelationshipChange::Create(RelationshipId(5), edge(0, 0)))
            .unwrap();
        rels.end(rx, EndFlags::Success).unwrap();
        rels.commit(rx, true).unwrap();
        assert_eq!(rels.read(|r| r.allocate()), RelationshipId(6));

        let rx = branch(&rels, 3, 0);
        rels.stage(rx, RelationshipChange::Delete(RelationshipId(5)))
            .unwrap();
        assert!(rels.relationships_for(TransactionId::new(3), NodeId(0)).is_empty());
        assert_eq!(rels.relationships_for(TransactionId::new(4), NodeId(0)).len(), 1);
        rels.end(rx, EndFlags::Success).unwrap();
        rels.commit(rx, true).unwrap();
        assert!(rels.read(|r| r.relationships_of(NodeId(0))).is_empty());
    }
}
