//! Property records.
//!
//! A property record maps `(entity, key)` to a slot that holds either the
//! inline encoding of the value or the head of a dynamic record chain,
//! never both. The chain itself lives in the string store; this store only
//! remembers where it starts.

use crate::error::{CoreError, CoreResult};
use crate::log::{put_short_str, PayloadReader};
use crate::resource::{JournaledResource, StoreState};
use crate::types::{EntityRef, RecordId, TransactionId, Xid};
use ridgedb_codec::PropertyType;
use std::collections::BTreeMap;

/// Longest property key accepted, in bytes.
pub const MAX_KEY_LEN: usize = 1024;

/// Where a property value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertySlot {
    /// Packed into the record.
    Inline {
        /// Type tag.
        kind: PropertyType,
        /// The 64-bit payload.
        payload: u64,
    },
    /// Stored in a dynamic record chain.
    Chain {
        /// Type tag.
        kind: PropertyType,
        /// First block of the chain.
        head: RecordId,
        /// Payload length in bytes.
        len: u32,
    },
}

impl PropertySlot {
    /// Type tag of the value.
    #[must_use]
    pub fn kind(&self) -> PropertyType {
        match self {
            Self::Inline { kind, .. } | Self::Chain { kind, .. } => *kind,
        }
    }

    /// Head of the owned chain, if any.
    #[must_use]
    pub fn chain_head(&self) -> Option<RecordId> {
        match self {
            Self::Chain { head, .. } => Some(*head),
            Self::Inline { .. } => None,
        }
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Inline { kind, payload } => {
                buf.push(1);
                buf.push(kind.as_byte());
                buf.extend_from_slice(&payload.to_le_bytes());
            }
            Self::Chain { kind, head, len } => {
                buf.push(2);
                buf.push(kind.as_byte());
                buf.extend_from_slice(&head.0.to_le_bytes());
                buf.extend_from_slice(&len.to_le_bytes());
            }
        }
    }

    fn decode(reader: &mut PayloadReader<'_>) -> CoreResult<Self> {
        let tag = reader.u8()?;
        let kind = PropertyType::from_byte(reader.u8()?)
            .map_err(|e| CoreError::log_corruption(e.to_string()))?;
        match tag {
            1 => Ok(Self::Inline {
                kind,
                payload: reader.u64()?,
            }),
            2 => Ok(Self::Chain {
                kind,
                head: RecordId(reader.u64()?),
                len: reader.u32()?,
            }),
            other => Err(CoreError::log_corruption(format!(
                "unknown property slot tag: {other}"
            ))),
        }
    }
}

/// One committed property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRecord {
    /// Owning entity.
    pub entity: EntityRef,
    /// Property key.
    pub key: String,
    /// Value slot.
    pub slot: PropertySlot,
}

/// A staged property mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyChange {
    /// Create or overwrite a property.
    Set {
        /// Owning entity.
        entity: EntityRef,
        /// Property key.
        key: String,
        /// New slot.
        slot: PropertySlot,
    },
    /// Remove a property.
    Remove {
        /// Owning entity.
        entity: EntityRef,
        /// Property key.
        key: String,
    },
}

/// Committed property records grouped by entity.
#[derive(Debug, Default)]
pub struct PropertyState {
    records: BTreeMap<EntityRef, BTreeMap<String, PropertySlot>>,
}

impl PropertyState {
    /// Creates an empty property store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the committed slot of a property.
    #[must_use]
    pub fn get(&self, entity: EntityRef, key: &str) -> Option<PropertySlot> {
        self.records.get(&entity).and_then(|m| m.get(key)).copied()
    }

    /// Committed property keys of an entity.
    #[must_use]
    pub fn keys(&self, entity: EntityRef) -> Vec<String> {
        self.records
            .get(&entity)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Total number of committed property records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.values().map(BTreeMap::len).sum()
    }

    /// Whether no property is committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every committed record.
    pub fn records(&self) -> impl Iterator<Item = PropertyRecord> + '_ {
        self.records.iter().flat_map(|(entity, slots)| {
            slots.iter().map(move |(key, slot)| PropertyRecord {
                entity: *entity,
                key: key.clone(),
                slot: *slot,
            })
        })
    }

    /// Heads of every committed chain.
    #[must_use]
    pub fn chain_heads(&self) -> Vec<RecordId> {
        self.records
            .values()
            .flat_map(BTreeMap::values)
            .filter_map(PropertySlot::chain_head)
            .collect()
    }

    /// Returns the slot of a property once `pending` is applied.
    #[must_use]
    pub fn visible(
        &self,
        pending: &[PropertyChange],
        entity: EntityRef,
        key: &str,
    ) -> Option<PropertySlot> {
        pending.iter().fold(self.get(entity, key), |current, change| match change {
            PropertyChange::Set {
                entity: e,
                key: k,
                slot,
            } if *e == entity && k == key => Some(*slot),
            PropertyChange::Remove { entity: e, key: k } if *e == entity && k == key => None,
            _ => current,
        })
    }

    /// Keys of an entity once `pending` is applied.
    #[must_use]
    pub fn visible_keys(&self, pending: &[PropertyChange], entity: EntityRef) -> Vec<String> {
        let mut keys: Vec<String> = self.keys(entity);
        for change in pending {
            match change {
                PropertyChange::Set { entity: e, key, .. } if *e == entity => {
                    if !keys.contains(key) {
                        keys.push(key.clone());
                    }
                }
                PropertyChange::Remove { entity: e, key } if *e == entity => {
                    keys.retain(|k| k != key);
                }
                _ => {}
            }
        }
        keys.sort();
        keys
    }
}

fn put_entity(buf: &mut Vec<u8>, entity: EntityRef) {
    buf.push(entity.tag());
    buf.extend_from_slice(&entity.raw_id().to_le_bytes());
}

fn read_entity(reader: &mut PayloadReader<'_>) -> CoreResult<EntityRef> {
    let tag = reader.u8()?;
    let id = reader.u64()?;
    EntityRef::from_parts(tag, id)
        .ok_or_else(|| CoreError::log_corruption(format!("unknown entity tag: {tag}")))
}

impl StoreState for PropertyState {
    type Change = PropertyChange;

    fn encode_change(change: &PropertyChange, buf: &mut Vec<u8>) {
        match change {
            PropertyChange::Set { entity, key, slot } => {
                buf.push(1);
                put_entity(buf, *entity);
                put_short_str(buf, key);
                slot.encode(buf);
            }
            PropertyChange::Remove { entity, key } => {
                buf.push(2);
                put_entity(buf, *entity);
                put_short_str(buf, key);
            }
        }
    }

    fn decode_change(reader: &mut PayloadReader<'_>) -> CoreResult<PropertyChange> {
        let tag = reader.u8()?;
        let entity = read_entity(reader)?;
        let key = reader.short_str()?;
        match tag {
            1 => Ok(PropertyChange::Set {
                entity,
                key,
                slot: PropertySlot::decode(reader)?,
            }),
            2 => Ok(PropertyChange::Remove { entity, key }),
            other => Err(CoreError::log_corruption(format!(
                "unknown property change tag: {other}"
            ))),
        }
    }

    fn check(&self, _xid: Xid, changes: &[PropertyChange]) -> CoreResult<()> {
        for change in changes {
            if let PropertyChange::Set { key, slot, .. } = change {
                if key.is_empty() || key.len() > MAX_KEY_LEN {
                    return Err(CoreError::invalid_operation(format!(
                        "property key length {} outside 1..={MAX_KEY_LEN}",
                        key.len()
                    )));
                }
                let chained = matches!(slot, PropertySlot::Chain { .. });
                if slot.kind().is_dynamic() != chained {
                    return Err(CoreError::invalid_operation(format!(
                        "{} values cannot live in this slot",
                        slot.kind().name()
                    )));
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, changes: &[PropertyChange]) -> CoreResult<()> {
        for change in changes {
            match change {
                PropertyChange::Set { entity, key, slot } => {
                    self.records
                        .entry(*entity)
                        .or_default()
                        .insert(key.clone(), *slot);
                }
                PropertyChange::Remove { entity, key } => {
                    if let Some(slots) = self.records.get_mut(entity) {
                        slots.remove(key);
                        if slots.is_empty() {
                            self.records.remove(entity);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn snapshot(&mut self) -> CoreResult<Vec<PropertyChange>> {
        Ok(self
            .records
            .iter()
            .flat_map(|(entity, slots)| {
                slots.iter().map(move |(key, slot)| PropertyChange::Set {
                    entity: *entity,
                    key: key.clone(),
                    slot: *slot,
                })
            })
            .collect())
    }
}

/// The property store participant.
pub type PropertyStore = JournaledResource<PropertyState>;

impl PropertyStore {
    /// Returns a property slot as seen by transaction `txid`.
    #[must_use]
    pub fn get_for(&self, txid: TransactionId, entity: EntityRef, key: &str) -> Option<PropertySlot> {
        self.inspect_branch(txid, |state, pending| state.visible(pending, entity, key))
    }

    /// Property keys of an entity as seen by transaction `txid`.
    #[must_use]
    pub fn keys_for(&self, txid: TransactionId, entity: EntityRef) -> Vec<String> {
        self.inspect_branch(txid, |state, pending| state.visible_keys(pending, entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{EndFlags, ResourceManager, StartFlags};
    use crate::types::NodeId;
    use ridgedb_storage::InMemoryBackend;

    const NODE: EntityRef = EntityRef::Node(NodeId(1));

    fn store(backend: &InMemoryBackend) -> PropertyStore {
        PropertyStore::open("props", Box::new(backend.clone()), PropertyState::new(), false)
            .unwrap()
    }

    fn commit(store: &PropertyStore, tx: u64, changes: Vec<PropertyChange>) -> CoreResult<()> {
        let xid = Xid::new(TransactionId::new(tx), 0);
        store.start(xid, StartFlags::New)?;
        for c in changes {
            store.stage(xid, c)?;
        }
        store.end(xid, EndFlags::Success)?;
        store.prepare(xid)?;
        store.commit(xid, false)
    }

    fn inline(payload: u64) -> PropertySlot {
        PropertySlot::Inline {
            kind: PropertyType::Int,
            payload,
        }
    }

    fn set(key: &str, slot: PropertySlot) -> PropertyChange {
        PropertyChange::Set {
            entity: NODE,
            key: key.to_string(),
            slot,
        }
    }

    #[test]
    fn set_overwrite_remove() {
        let backend = InMemoryBackend::new();
        let s = store(&backend);
        commit(&s, 1, vec![set("age", inline(41))]).unwrap();
        commit(&s, 2, vec![set("age", inline(42))]).unwrap();
        assert_eq!(s.read(|p| p.get(NODE, "age")), Some(inline(42)));

        let chain = PropertySlot::Chain {
            kind: PropertyType::String,
            head: RecordId(3),
            len: 300,
        };
        commit(&s, 3, vec![set("bio", chain)]).unwrap();
        assert_eq!(s.read(PropertyState::chain_heads), vec![RecordId(3)]);
        drop(s);

        let s = store(&backend);
        assert_eq!(s.read(|p| p.keys(NODE)), vec!["age", "bio"]);
        commit(
            &s,
            4,
            vec![PropertyChange::Remove {
                entity: NODE,
                key: "bio".into(),
            }],
        )
        .unwrap();
        assert_eq!(s.read(PropertyState::len), 1);
    }

    #[test]
    fn slot_must_match_type() {
        let s = store(&InMemoryBackend::new());
        let wrong = PropertySlot::Inline {
            kind: PropertyType::String,
            payload: 0,
        };
        assert!(commit(&s, 1, vec![set("name", wrong)]).is_err());
        assert!(commit(&s, 2, vec![set("", inline(0))]).is_err());
        assert!(s.read(PropertyState::is_empty));
    }

    #[test]
    fn pending_view() {
        let s = store(&InMemoryBackend::new());
        commit(&s, 1, vec![set("a", inline(1))]).unwrap();

        let xid = Xid::new(TransactionId::new(2), 0);
        s.start(xid, StartFlags::New).unwrap();
        s.stage(xid, set("b", inline(2))).unwrap();
        s.stage(
            xid,
            PropertyChange::Remove {
                entity: NODE,
                key: "a".into(),
            },
        )
        .unwrap();

        let tx = TransactionId::new(2);
        assert_eq!(s.keys_for(tx, NODE), vec!["b"]);
        assert_eq!(s.get_for(tx, NODE, "a"), None);
        assert_eq!(s.get_for(TransactionId::new(9), NODE, "a"), Some(inline(1)));
    }
}
