//! The physical stores and their participants.
//!
//! Each store keeps its committed state in memory and its history in a
//! branch journal. The overflow store additionally owns the dynamic record
//! file that holds values too long for an inline slot.

mod node;
mod property;
mod relationship;
mod strings;

pub use node::{NodeChange, NodeState, NodeStore};
pub use property::{
    PropertyChange, PropertyRecord, PropertySlot, PropertyState, PropertyStore, MAX_KEY_LEN,
};
pub use relationship::{
    RelationshipChange, RelationshipRecord, RelationshipState, RelationshipStore,
};
pub use strings::{StringChange, StringState, StringStore};

use crate::config::Config;
use crate::dynamic::DynamicStore;
use crate::error::CoreResult;
use crate::resource::{ResourceManager, ResourceRegistry};
use crate::types::TransactionId;
use ridgedb_storage::{InMemoryBackend, StorageBackend};
use std::sync::Arc;
use tracing::info;

/// Participant name of the node store.
pub const NODE_STORE: &str = "neostore.nodestore";
/// Participant name of the relationship store.
pub const RELATIONSHIP_STORE: &str = "neostore.relationshipstore";
/// Participant name of the property store.
pub const PROPERTY_STORE: &str = "neostore.propertystore";
/// Participant name of the overflow store.
pub const STRING_STORE: &str = "neostore.propertystore.strings";

/// Byte stores backing one set of stores.
pub struct StoreBackends {
    /// Node store journal.
    pub node_journal: Box<dyn StorageBackend>,
    /// Relationship store journal.
    pub relationship_journal: Box<dyn StorageBackend>,
    /// Property store journal.
    pub property_journal: Box<dyn StorageBackend>,
    /// Dynamic record blocks.
    pub string_blocks: Box<dyn StorageBackend>,
    /// Overflow store journal.
    pub string_journal: Box<dyn StorageBackend>,
}

impl StoreBackends {
    /// Fresh in-memory backends.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            node_journal: Box::new(InMemoryBackend::new()),
            relationship_journal: Box::new(InMemoryBackend::new()),
            property_journal: Box::new(InMemoryBackend::new()),
            string_blocks: Box::new(InMemoryBackend::new()),
            string_journal: Box::new(InMemoryBackend::new()),
        }
    }
}

impl std::fmt::Debug for StoreBackends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreBackends").finish_non_exhaustive()
    }
}

/// The open stores of one database.
#[derive(Debug, Clone)]
pub struct Stores {
    /// Node store.
    pub nodes: Arc<NodeStore>,
    /// Relationship store.
    pub relationships: Arc<RelationshipStore>,
    /// Property store.
    pub properties: Arc<PropertyStore>,
    /// Overflow store.
    pub strings: Arc<StringStore>,
    /// Dynamic record file shared with the overflow store.
    pub dynamic: Arc<DynamicStore>,
}

impl Stores {
    /// Opens every store, replaying its journal.
    ///
    /// Journals larger than `config.max_journal_size` are compacted before
    /// the stores are handed out.
    ///
    /// # Errors
    ///
    /// Returns an error if a journal or the dynamic record file is corrupted.
    pub fn open(backends: StoreBackends, config: &Config) -> CoreResult<Self> {
        let sync = config.sync_on_commit;
        let dynamic = Arc::new(DynamicStore::open(backends.string_blocks, config.block_size)?);
        let strings = Arc::new(StringStore::open(
            STRING_STORE,
            backends.string_journal,
            StringState::new(Arc::clone(&dynamic)),
            sync,
        )?);
        let nodes = Arc::new(NodeStore::open(
            NODE_STORE,
            backends.node_journal,
            NodeState::new(),
            sync,
        )?);
        let relationships = Arc::new(RelationshipStore::open(
            RELATIONSHIP_STORE,
            backends.relationship_journal,
            RelationshipState::new(Arc::clone(&nodes)),
            sync,
        )?);
        let properties = Arc::new(PropertyStore::open(
            PROPERTY_STORE,
            backends.property_journal,
            PropertyState::new(),
            sync,
        )?);
        let stores = Self {
            nodes,
            relationships,
            properties,
            strings,
            dynamic,
        };
        stores.compact_journals(config.max_journal_size)?;
        Ok(stores)
    }

    /// Compacts every journal that has grown past `limit` bytes and
    /// returns how many were compacted.
    ///
    /// # Errors
    ///
    /// Returns an error if a journal cannot be rewritten.
    pub fn compact_journals(&self, limit: u64) -> CoreResult<usize> {
        let compacted = [
            self.strings.compact_if_larger(limit)?,
            self.nodes.compact_if_larger(limit)?,
            self.relationships.compact_if_larger(limit)?,
            self.properties.compact_if_larger(limit)?,
        ]
        .into_iter()
        .filter(|done| *done)
        .count();
        if compacted > 0 {
            info!(compacted, limit, "store journals compacted");
        }
        Ok(compacted)
    }

    /// The participants in the order transactions enlist them.
    #[must_use]
    pub fn participants(&self) -> Vec<Arc<dyn ResourceManager>> {
        vec![
            Arc::clone(&self.nodes) as Arc<dyn ResourceManager>,
            Arc::clone(&self.relationships) as Arc<dyn ResourceManager>,
            Arc::clone(&self.properties) as Arc<dyn ResourceManager>,
            Arc::clone(&self.strings) as Arc<dyn ResourceManager>,
        ]
    }

    /// Adds every participant to `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if one of the names is already registered.
    pub fn register(&self, registry: &ResourceRegistry) -> CoreResult<()> {
        for participant in self.participants() {
            registry.register(participant)?;
        }
        Ok(())
    }

    /// Highest transaction id any journal has seen.
    #[must_use]
    pub fn highest_txid(&self) -> Option<TransactionId> {
        [
            self.nodes.highest_txid(),
            self.relationships.highest_txid(),
            self.properties.highest_txid(),
            self.strings.highest_txid(),
        ]
        .into_iter()
        .flatten()
        .max()
    }

    /// Heads of every committed overflow chain.
    #[must_use]
    pub fn chain_heads(&self) -> Vec<crate::types::RecordId> {
        self.properties.read(PropertyState::chain_heads)
    }
}
