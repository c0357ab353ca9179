//! Core type definitions for RidgeDB.

use std::fmt;

/// Unique identifier for a global transaction.
///
/// Transaction IDs are monotonically increasing and never reused within
/// a database's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Identifier of one branch of a global transaction.
///
/// `branch` is the participant's enlistment ordinal within the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Xid {
    /// The global transaction.
    pub global: TransactionId,
    /// Branch ordinal.
    pub branch: u32,
}

impl Xid {
    /// Creates a branch identifier.
    #[must_use]
    pub const fn new(global: TransactionId, branch: u32) -> Self {
        Self { global, branch }
    }

    /// Size of the encoded form.
    pub const ENCODED_LEN: usize = 12;

    /// Appends the little-endian encoding.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.global.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.branch.to_le_bytes());
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.global, self.branch)
    }
}

/// Identifier of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

/// Identifier of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelationshipId(pub u64);

impl fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rel:{}", self.0)
    }
}

/// Identifier of a dynamic record block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block:{}", self.0)
    }
}

/// An entity that can own properties and take locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityRef {
    /// A node.
    Node(NodeId),
    /// A relationship.
    Relationship(RelationshipId),
}

impl EntityRef {
    /// Tag byte used in journal payloads.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Node(_) => 0,
            Self::Relationship(_) => 1,
        }
    }

    /// Raw id of the entity.
    #[must_use]
    pub const fn raw_id(self) -> u64 {
        match self {
            Self::Node(id) => id.0,
            Self::Relationship(id) => id.0,
        }
    }

    /// Rebuilds an entity from its tag and raw id.
    #[must_use]
    pub const fn from_parts(tag: u8, id: u64) -> Option<Self> {
        match tag {
            0 => Some(Self::Node(NodeId(id))),
            1 => Some(Self::Relationship(RelationshipId(id))),
            _ => None,
        }
    }
}

impl From<NodeId> for EntityRef {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

impl From<RelationshipId> for EntityRef {
    fn from(id: RelationshipId) -> Self {
        Self::Relationship(id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(id) => id.fmt(f),
            Self::Relationship(id) => id.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_ordering() {
        let t1 = TransactionId::new(1);
        let t2 = TransactionId::new(2);
        assert!(t1 < t2);
    }

    #[test]
    fn xid_display() {
        let xid = Xid::new(TransactionId::new(7), 2);
        assert_eq!(format!("{xid}"), "txn:7/2");
    }

    #[test]
    fn entity_ref_parts() {
        let e = EntityRef::Relationship(RelationshipId(9));
        assert_eq!(EntityRef::from_parts(e.tag(), e.raw_id()), Some(e));
        assert_eq!(EntityRef::from_parts(7, 1), None);
        assert_eq!(format!("{}", EntityRef::Node(NodeId(3))), "node:3");
    }
}
