//! The index contract.
//!
//! Indexes consume committed property data. Bulk removal by key or by
//! entity is optional: a backend that does not implement it reports
//! [`CoreError::UnsupportedOperation`] instead of guessing.

use crate::error::{CoreError, CoreResult};
use crate::types::EntityRef;
use parking_lot::RwLock;
use ridgedb_codec::{encode_value, EncodedValue, PropertyValue};
use std::collections::{BTreeMap, BTreeSet};

/// Canonical byte form of a value used as an index key.
///
/// Equal values always produce equal keys; floats compare by bit pattern.
#[must_use]
pub fn value_key(value: &PropertyValue) -> Vec<u8> {
    match encode_value(value) {
        EncodedValue::Inline { kind, payload } => {
            let mut key = vec![kind.as_byte()];
            key.extend_from_slice(&payload.to_be_bytes());
            key
        }
        EncodedValue::Overflow { kind, bytes } => {
            let mut key = Vec::with_capacity(bytes.len() + 1);
            key.push(kind.as_byte());
            key.extend_from_slice(&bytes);
            key
        }
    }
}

/// An index from `(key, value)` to the entities carrying that property.
pub trait Index: Send + Sync {
    /// Index name.
    fn name(&self) -> &str;

    /// Records that `entity` has `key = value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index was deleted or cannot be updated.
    fn add(&self, entity: EntityRef, key: &str, value: &PropertyValue) -> CoreResult<()>;

    /// Removes one `(entity, key, value)` entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the index was deleted or cannot be updated.
    fn remove(&self, entity: EntityRef, key: &str, value: &PropertyValue) -> CoreResult<()>;

    /// Removes every entry of `entity` under `key`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedOperation` unless the backend implements it.
    fn remove_key(&self, _entity: EntityRef, _key: &str) -> CoreResult<()> {
        Err(CoreError::UnsupportedOperation {
            operation: "remove_key",
        })
    }

    /// Removes every entry of `entity`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedOperation` unless the backend implements it.
    fn remove_entity(&self, _entity: EntityRef) -> CoreResult<()> {
        Err(CoreError::UnsupportedOperation {
            operation: "remove_entity",
        })
    }

    /// Entities with `key = value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index was deleted.
    fn get(&self, key: &str, value: &PropertyValue) -> CoreResult<Vec<EntityRef>>;

    /// Drops the whole index.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be dropped.
    fn delete(&self) -> CoreResult<()>;
}

type Entries = BTreeMap<(String, Vec<u8>), BTreeSet<EntityRef>>;

/// In-memory exact-match index supporting every operation.
#[derive(Debug)]
pub struct ExactIndex {
    name: String,
    entries: RwLock<Option<Entries>>,
}

impl ExactIndex {
    /// Creates an empty index.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(Some(BTreeMap::new())),
        }
    }

    /// Number of `(key, value)` pairs indexed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().as_ref().map_or(0, BTreeMap::len)
    }

    /// Whether nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn deleted(&self) -> CoreError {
        CoreError::invalid_operation(format!("index '{}' was deleted", self.name))
    }

    fn update<R>(&self, f: impl FnOnce(&mut Entries) -> R) -> CoreResult<R> {
        let mut guard = self.entries.write();
        let entries = guard.as_mut().ok_or_else(|| self.deleted())?;
        Ok(f(entries))
    }
}

impl Index for ExactIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn add(&self, entity: EntityRef, key: &str, value: &PropertyValue) -> CoreResult<()> {
        let slot = (key.to_string(), value_key(value));
        self.update(|entries| {
            entries.entry(slot).or_default().insert(entity);
        })
    }

    fn remove(&self, entity: EntityRef, key: &str, value: &PropertyValue) -> CoreResult<()> {
        let slot = (key.to_string(), value_key(value));
        self.update(|entries| {
            if let Some(set) = entries.get_mut(&slot) {
                set.remove(&entity);
                if set.is_empty() {
                    entries.remove(&slot);
                }
            }
        })
    }

    fn remove_key(&self, entity: EntityRef, key: &str) -> CoreResult<()> {
        self.update(|entries| {
            entries.retain(|(k, _), set| {
                if k == key {
                    set.remove(&entity);
                }
                !set.is_empty()
            });
        })
    }

    fn remove_entity(&self, entity: EntityRef) -> CoreResult<()> {
        self.update(|entries| {
            entries.retain(|_, set| {
                set.remove(&entity);
                !set.is_empty()
            });
        })
    }

    fn get(&self, key: &str, value: &PropertyValue) -> CoreResult<Vec<EntityRef>> {
        let guard = self.entries.read();
        let entries = guard.as_ref().ok_or_else(|| self.deleted())?;
        Ok(entries
            .get(&(key.to_string(), value_key(value)))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    fn delete(&self) -> CoreResult<()> {
        *self.entries.write() = None;
        Ok(())
    }
}
