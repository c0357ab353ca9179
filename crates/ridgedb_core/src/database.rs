//! Database facade.

use crate::config::Config;
use crate::dir::DatabaseDir;
use crate::dynamic::VerifyReport;
use crate::error::{CoreError, CoreResult};
use crate::lock::{LocalLockManager, LockManager, LockMode, LockOutcome};
use crate::resource::{JournaledResource, ResourceManager, ResourceRegistry, StoreState};
use crate::store::{
    NodeChange, PropertyChange, PropertySlot, RelationshipChange, RelationshipRecord,
    StoreBackends, Stores, StringChange, MAX_KEY_LEN,
};
use crate::transaction::{RecoveryReport, TransactionInfo, TransactionManager};
use crate::txlog::RecoveryLog;
use crate::types::{EntityRef, NodeId, RecordId, RelationshipId, TransactionId, Xid};
use parking_lot::{Mutex, RwLock};
use ridgedb_codec::{decode_inline, decode_overflow, encode_value, EncodedValue, PropertyValue};
use ridgedb_storage::{InMemoryBackend, StorageBackend};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Branches a transaction has opened so far, by participant name.
#[derive(Debug, Default)]
struct TxContext {
    branches: HashMap<String, Xid>,
}

/// The main database handle.
///
/// `GraphDatabase` ties the stores, the coordinator and the lock manager
/// together:
/// - every mutation locks the entities it touches and stages a change on
///   the store that owns them
/// - a store joins a transaction the first time the transaction touches it
/// - commit goes through the [`TransactionManager`], so a transaction that
///   touched one store commits in one phase and anything larger in two
///
/// # Example
///
/// ```rust,ignore
/// use ridgedb_core::GraphDatabase;
///
/// let db = GraphDatabase::open_in_memory()?;
/// let alice = db.transaction(|db, tx| {
///     let alice = db.create_node(tx)?;
///     db.set_property(tx, alice.into(), "name", "Alice".into())?;
///     Ok(alice)
/// })?;
/// assert_eq!(db.get_property(alice.into(), "name")?, Some("Alice".into()));
/// ```
pub struct GraphDatabase {
    /// Configuration.
    config: Config,
    /// Database directory (holds the lock). None for in-memory databases.
    dir: Option<DatabaseDir>,
    /// The record stores.
    stores: Stores,
    /// Transaction coordinator.
    tm: Arc<TransactionManager>,
    /// Entity locks.
    locks: LocalLockManager,
    /// Open transactions begun through this handle.
    contexts: Mutex<HashMap<TransactionId, TxContext>>,
    /// What startup recovery did.
    recovery: RecoveryReport,
    /// Whether the database is open.
    is_open: RwLock<bool>,
}

impl GraphDatabase {
    /// Opens a database from a directory path with the default
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process has the database locked (`DatabaseLocked`)
    /// - Recovery cannot reconcile a participant (`RecoveryFailed`)
    /// - I/O errors occur
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a database from a directory path with custom configuration.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use ridgedb_core::{Config, GraphDatabase};
    /// use std::time::Duration;
    ///
    /// let config = Config::default()
    ///     .block_size(64)
    ///     .transaction_timeout(Some(Duration::from_secs(5)));
    /// let db = GraphDatabase::open_with_config(Path::new("graph"), config)?;
    /// ```
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        config.validate()?;
        let dir = DatabaseDir::open(path, config.create_if_missing)?;
        let log = dir.open_tx_log()?;
        let backends = dir.open_stores()?;
        info!(path = %dir.path().display(), "opening database");
        Self::assemble(config, Some(dir), log, backends, Vec::new())
    }

    /// Opens a database with the given backends.
    ///
    /// This is a lower-level constructor for when you have pre-configured
    /// backends. For most use cases, prefer [`open`](Self::open).
    ///
    /// # Errors
    ///
    /// Returns an error if a log is corrupted or recovery fails.
    pub fn open_with_backends(
        config: Config,
        log_backend: Box<dyn StorageBackend>,
        backends: StoreBackends,
    ) -> CoreResult<Self> {
        Self::open_with_resources(config, log_backend, backends, Vec::new())
    }

    /// Opens a database whose transactions may also enlist `resources`.
    ///
    /// The extra participants are registered before recovery so that their
    /// in-doubt branches are reconciled along with the stores'.
    ///
    /// # Errors
    ///
    /// Returns an error if a name collides with a store, a log is
    /// corrupted, or recovery fails.
    pub fn open_with_resources(
        config: Config,
        log_backend: Box<dyn StorageBackend>,
        backends: StoreBackends,
        resources: Vec<Arc<dyn ResourceManager>>,
    ) -> CoreResult<Self> {
        config.validate()?;
        Self::assemble(config, None, log_backend, backends, resources)
    }

    /// Opens a fresh in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Only fails on allocation of the initial stores.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backends(
            Config::default(),
            Box::new(InMemoryBackend::new()),
            StoreBackends::in_memory(),
        )
    }

    fn assemble(
        config: Config,
        dir: Option<DatabaseDir>,
        log_backend: Box<dyn StorageBackend>,
        backends: StoreBackends,
        resources: Vec<Arc<dyn ResourceManager>>,
    ) -> CoreResult<Self> {
        let stores = Stores::open(backends, &config)?;
        let registry = Arc::new(ResourceRegistry::new());
        stores.register(&registry)?;
        for resource in resources {
            registry.register(resource)?;
        }

        let log = Arc::new(RecoveryLog::open(
            log_backend,
            config.sync_on_commit,
            config.max_log_size,
        )?);
        let tm = Arc::new(TransactionManager::new(log, registry, &config));
        if let Some(highest) = stores.highest_txid() {
            tm.observe_txid(highest);
        }

        let recovery = tm.recover()?;
        if !recovery.in_doubt.is_empty() {
            warn!(
                in_doubt = recovery.in_doubt.len(),
                "database opened with transactions in doubt"
            );
        }

        Ok(Self {
            config,
            dir,
            stores,
            tm,
            locks: LocalLockManager::new(),
            contexts: Mutex::new(HashMap::new()),
            recovery,
            is_open: RwLock::new(true),
        })
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begins a new transaction.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseClosed` after [`close`](Self::close).
    pub fn begin(&self) -> CoreResult<TransactionId> {
        self.ensure_open()?;
        let txid = self.tm.begin()?;
        self.contexts.lock().insert(txid, TxContext::default());
        Ok(txid)
    }

    /// Commits a transaction and releases its locks.
    ///
    /// # Errors
    ///
    /// Returns whatever the coordinator reports: `RollbackRequired` when a
    /// participant vetoed, `HeuristicMixed` or `Timeout` when the outcome
    /// is only partly known.
    pub fn commit(&self, txid: TransactionId) -> CoreResult<()> {
        self.ensure_open()?;
        self.finish(txid, |tm| tm.commit(txid))
    }

    /// Rolls back a transaction and releases its locks.
    ///
    /// # Errors
    ///
    /// Returns an error if a participant could not be rolled back.
    pub fn rollback(&self, txid: TransactionId) -> CoreResult<()> {
        self.ensure_open()?;
        self.finish(txid, |tm| tm.rollback(txid))
    }

    fn finish(
        &self,
        txid: TransactionId,
        f: impl FnOnce(&TransactionManager) -> CoreResult<()>,
    ) -> CoreResult<()> {
        if self.contexts.lock().remove(&txid).is_none() {
            return Err(CoreError::not_found(txid.to_string()));
        }
        let result = f(&self.tm);
        self.release_locks(txid);
        result
    }

    /// Releases the locks of `txid` unless it is left in doubt.
    ///
    /// An in-doubt transaction may still hold prepared changes to the
    /// entities it locked, so they stay locked until it is forgotten.
    fn release_locks(&self, txid: TransactionId) {
        if let Some(state) = self.tm.state(txid) {
            debug!(%txid, %state, "keeping locks of in-doubt transaction");
            return;
        }
        self.locks.release_all(txid);
    }

    /// Executes a function within a transaction.
    ///
    /// If the function returns `Ok`, the transaction is committed.
    /// If it returns `Err`, the transaction is rolled back.
    ///
    /// # Errors
    ///
    /// Returns the function's error, or the commit error.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Self, TransactionId) -> CoreResult<T>,
    {
        let txid = self.begin()?;
        match f(self, txid) {
            Ok(value) => {
                self.commit(txid)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.rollback(txid) {
                    warn!(%txid, error = %rollback, "rollback after failed closure failed");
                }
                Err(e)
            }
        }
    }

    /// Marks a transaction so that its commit rolls it back.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown transaction.
    pub fn set_rollback_only(&self, txid: TransactionId) -> CoreResult<()> {
        self.tm.set_rollback_only(txid)
    }

    /// Enlists an additional participant in a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is unknown or the participant
    /// refuses to start.
    pub fn enlist(&self, txid: TransactionId, rm: Arc<dyn ResourceManager>) -> CoreResult<Xid> {
        self.ensure_open()?;
        self.context_exists(txid)?;
        let name = rm.name().to_string();
        let xid = self.tm.enlist(txid, rm)?.xid();
        if let Some(ctx) = self.contexts.lock().get_mut(&txid) {
            ctx.branches.insert(name, xid);
        }
        Ok(xid)
    }

    fn context_exists(&self, txid: TransactionId) -> CoreResult<()> {
        if self.contexts.lock().contains_key(&txid) {
            Ok(())
        } else {
            Err(CoreError::not_found(txid.to_string()))
        }
    }

    /// The branch `store` works under for `txid`, enlisting it on first use.
    fn branch<S: StoreState>(
        &self,
        txid: TransactionId,
        store: &Arc<JournaledResource<S>>,
    ) -> CoreResult<Xid> {
        {
            let contexts = self.contexts.lock();
            let ctx = contexts
                .get(&txid)
                .ok_or_else(|| CoreError::not_found(txid.to_string()))?;
            if let Some(xid) = ctx.branches.get(store.name()) {
                return Ok(*xid);
            }
        }
        let xid = self
            .tm
            .enlist(txid, Arc::clone(store) as Arc<dyn ResourceManager>)?
            .xid();
        if let Some(ctx) = self.contexts.lock().get_mut(&txid) {
            ctx.branches.insert(store.name().to_string(), xid);
        }
        Ok(xid)
    }

    fn stage<S: StoreState>(
        &self,
        txid: TransactionId,
        store: &Arc<JournaledResource<S>>,
        change: S::Change,
    ) -> CoreResult<()> {
        let xid = self.branch(txid, store)?;
        store.stage(xid, change)
    }

    fn lock(&self, txid: TransactionId, entity: EntityRef, mode: LockMode) -> CoreResult<()> {
        self.context_exists(txid)?;
        match self.locks.acquire(txid, entity, mode)? {
            LockOutcome::Granted => Ok(()),
            LockOutcome::Blocked => Err(CoreError::LockUnavailable {
                entity: entity.to_string(),
            }),
            LockOutcome::Deadlock => {
                debug!(%txid, %entity, "deadlock, marking transaction rollback-only");
                self.tm.set_rollback_only(txid)?;
                Err(CoreError::Deadlock {
                    txid,
                    entity: entity.to_string(),
                })
            }
        }
    }

    // ========================================================================
    // Nodes and relationships
    // ========================================================================

    /// Creates a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is unknown or not active.
    pub fn create_node(&self, txid: TransactionId) -> CoreResult<NodeId> {
        self.ensure_open()?;
        let id = self.stores.nodes.read(|state| state.allocate());
        self.lock(txid, id.into(), LockMode::Exclusive)?;
        self.stage(txid, &self.stores.nodes, NodeChange::Create(id))?;
        Ok(id)
    }

    /// Deletes a node and its properties.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing node and `InvalidOperation` while
    /// relationships still touch it.
    pub fn delete_node(&self, txid: TransactionId, id: NodeId) -> CoreResult<()> {
        self.ensure_open()?;
        self.lock(txid, id.into(), LockMode::Exclusive)?;
        if !self.stores.nodes.exists_for(txid, id) {
            return Err(CoreError::not_found(id.to_string()));
        }
        let attached = self.stores.relationships.relationships_for(txid, id);
        if !attached.is_empty() {
            return Err(CoreError::invalid_operation(format!(
                "{id} still has {} relationships",
                attached.len()
            )));
        }
        self.remove_all_properties(txid, id.into())?;
        self.stage(txid, &self.stores.nodes, NodeChange::Delete(id))
    }

    /// Creates a relationship from `start` to `end`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if an endpoint does not exist.
    pub fn create_relationship(
        &self,
        txid: TransactionId,
        start: NodeId,
        end: NodeId,
        rel_type: u32,
    ) -> CoreResult<RelationshipId> {
        self.ensure_open()?;
        for node in [start, end] {
            self.lock(txid, node.into(), LockMode::Shared)?;
            if !self.stores.nodes.exists_for(txid, node) {
                return Err(CoreError::not_found(node.to_string()));
            }
        }
        let id = self.stores.relationships.read(|state| state.allocate());
        self.lock(txid, id.into(), LockMode::Exclusive)?;
        let record = RelationshipRecord {
            start,
            end,
            rel_type,
        };
        self.stage(
            txid,
            &self.stores.relationships,
            RelationshipChange::Create(id, record),
        )?;
        Ok(id)
    }

    /// Deletes a relationship and its properties.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing relationship.
    pub fn delete_relationship(&self, txid: TransactionId, id: RelationshipId) -> CoreResult<()> {
        self.ensure_open()?;
        self.lock(txid, id.into(), LockMode::Exclusive)?;
        if self.stores.relationships.get_for(txid, id).is_none() {
            return Err(CoreError::not_found(id.to_string()));
        }
        self.remove_all_properties(txid, id.into())?;
        self.stage(txid, &self.stores.relationships, RelationshipChange::Delete(id))
    }

    /// Whether a node exists in committed state.
    #[must_use]
    pub fn node_exists(&self, id: NodeId) -> bool {
        self.stores.nodes.read(|state| state.contains(id))
    }

    /// Whether a node exists as seen by `txid`.
    #[must_use]
    pub fn node_exists_in(&self, txid: TransactionId, id: NodeId) -> bool {
        self.stores.nodes.exists_for(txid, id)
    }

    /// Committed node count.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.stores.nodes.read(|state| state.len())
    }

    /// A committed relationship.
    #[must_use]
    pub fn relationship(&self, id: RelationshipId) -> Option<RelationshipRecord> {
        self.stores.relationships.read(|state| state.get(id))
    }

    /// Committed relationships touching `node`.
    #[must_use]
    pub fn relationships_of(&self, node: NodeId) -> Vec<RelationshipId> {
        self.stores
            .relationships
            .read(|state| state.relationships_of(node))
    }

    /// Relationships touching `node` as seen by `txid`.
    #[must_use]
    pub fn relationships_of_in(&self, txid: TransactionId, node: NodeId) -> BTreeSet<RelationshipId> {
        self.stores.relationships.relationships_for(txid, node)
    }

    fn entity_exists_for(&self, txid: TransactionId, entity: EntityRef) -> bool {
        match entity {
            EntityRef::Node(id) => self.stores.nodes.exists_for(txid, id),
            EntityRef::Relationship(id) => self.stores.relationships.get_for(txid, id).is_some(),
        }
    }

    // ========================================================================
    // Properties
    // ========================================================================

    /// Sets a property, replacing any previous value.
    ///
    /// Values that fit a 64-bit slot are stored inline; everything else is
    /// written to a freshly reserved dynamic record chain, and the chain of
    /// the replaced value is freed when the transaction commits.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for an empty or oversized key and
    /// `NotFound` if the entity does not exist.
    pub fn set_property(
        &self,
        txid: TransactionId,
        entity: EntityRef,
        key: &str,
        value: PropertyValue,
    ) -> CoreResult<()> {
        self.ensure_open()?;
        check_key(key)?;
        self.lock(txid, entity, LockMode::Exclusive)?;
        if !self.entity_exists_for(txid, entity) {
            return Err(CoreError::not_found(entity.to_string()));
        }

        let previous = self.stores.properties.get_for(txid, entity, key);
        let slot = match encode_value(&value) {
            EncodedValue::Inline { kind, payload } => PropertySlot::Inline { kind, payload },
            EncodedValue::Overflow { kind, bytes } => {
                let len = u32::try_from(bytes.len()).map_err(|_| {
                    CoreError::invalid_operation(format!("{} byte value is too long", bytes.len()))
                })?;
                let head = self.write_chain(txid, bytes)?;
                PropertySlot::Chain { kind, head, len }
            }
        };

        if let Some(old) = previous {
            self.free_slot(txid, old)?;
        }
        self.stage(
            txid,
            &self.stores.properties,
            PropertyChange::Set {
                entity,
                key: key.to_string(),
                slot,
            },
        )
    }

    /// Removes a property. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is unknown or not active.
    pub fn remove_property(
        &self,
        txid: TransactionId,
        entity: EntityRef,
        key: &str,
    ) -> CoreResult<bool> {
        self.ensure_open()?;
        self.lock(txid, entity, LockMode::Exclusive)?;
        let Some(old) = self.stores.properties.get_for(txid, entity, key) else {
            return Ok(false);
        };
        self.free_slot(txid, old)?;
        self.stage(
            txid,
            &self.stores.properties,
            PropertyChange::Remove {
                entity,
                key: key.to_string(),
            },
        )?;
        Ok(true)
    }

    fn remove_all_properties(&self, txid: TransactionId, entity: EntityRef) -> CoreResult<()> {
        for key in self.stores.properties.keys_for(txid, entity) {
            self.remove_property(txid, entity, &key)?;
        }
        Ok(())
    }

    fn write_chain(&self, txid: TransactionId, data: Vec<u8>) -> CoreResult<RecordId> {
        let dynamic = &self.stores.dynamic;
        let ids = dynamic.reserve(dynamic.blocks_needed(data.len()))?;
        let Some(head) = ids.first().copied() else {
            return Err(CoreError::invalid_operation("empty block reservation"));
        };
        if let Err(e) = self.stage(
            txid,
            &self.stores.strings,
            StringChange::Write {
                ids: ids.clone(),
                data,
            },
        ) {
            dynamic.release(&ids);
            return Err(e);
        }
        Ok(head)
    }

    /// Staged write of `txid` that starts at `head`, if any.
    fn pending_chain(&self, txid: TransactionId, head: RecordId) -> Option<(Vec<RecordId>, Vec<u8>)> {
        self.stores.strings.inspect_branch(txid, |_, pending| {
            pending.iter().find_map(|change| match change {
                StringChange::Write { ids, data } if ids.first() == Some(&head) => {
                    Some((ids.clone(), data.clone()))
                }
                _ => None,
            })
        })
    }

    fn free_slot(&self, txid: TransactionId, slot: PropertySlot) -> CoreResult<()> {
        let Some(head) = slot.chain_head() else {
            return Ok(());
        };
        let ids = match self.pending_chain(txid, head) {
            Some((ids, _)) => ids,
            None => self.stores.dynamic.chain_ids(head)?,
        };
        self.stage(txid, &self.stores.strings, StringChange::Free { ids })
    }

    fn load(&self, txid: Option<TransactionId>, slot: PropertySlot) -> CoreResult<PropertyValue> {
        match slot {
            PropertySlot::Inline { kind, payload } => Ok(decode_inline(kind, payload)?),
            PropertySlot::Chain { kind, head, len } => {
                let pending = txid.and_then(|txid| self.pending_chain(txid, head));
                let bytes = match pending {
                    Some((_, data)) => data,
                    None => self.stores.dynamic.read_chain(head)?,
                };
                if bytes.len() != len as usize {
                    return Err(CoreError::invalid_record(format!(
                        "chain at {head} holds {} bytes, property expects {len}",
                        bytes.len()
                    )));
                }
                Ok(decode_overflow(kind, bytes)?)
            }
        }
    }

    /// Reads a committed property.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value cannot be decoded.
    pub fn get_property(&self, entity: EntityRef, key: &str) -> CoreResult<Option<PropertyValue>> {
        self.ensure_open()?;
        self.stores
            .properties
            .read(|state| state.get(entity, key))
            .map(|slot| self.load(None, slot))
            .transpose()
    }

    /// Reads a property as seen by `txid`, including its staged changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value cannot be decoded.
    pub fn get_property_in(
        &self,
        txid: TransactionId,
        entity: EntityRef,
        key: &str,
    ) -> CoreResult<Option<PropertyValue>> {
        self.ensure_open()?;
        self.stores
            .properties
            .get_for(txid, entity, key)
            .map(|slot| self.load(Some(txid), slot))
            .transpose()
    }

    /// Committed property keys of an entity, sorted.
    #[must_use]
    pub fn property_keys(&self, entity: EntityRef) -> Vec<String> {
        self.stores.properties.read(|state| state.keys(entity))
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// What startup recovery did.
    #[must_use]
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Transactions left in doubt.
    #[must_use]
    pub fn in_doubt(&self) -> Vec<TransactionInfo> {
        self.tm.in_doubt()
    }

    /// Tells the participants of an in-doubt transaction to discard it.
    ///
    /// The entities the transaction locked are released once every
    /// participant has acknowledged. Ids that are not in doubt are ignored.
    ///
    /// # Errors
    ///
    /// Returns a participant's failure, in which case the transaction stays
    /// in doubt, or an error if the acknowledgement cannot be logged.
    pub fn forget(&self, txid: TransactionId) -> CoreResult<()> {
        self.ensure_open()?;
        self.tm.forget(txid)?;
        self.release_locks(txid);
        Ok(())
    }

    /// The transaction coordinator.
    #[must_use]
    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.tm
    }

    /// The record stores.
    #[must_use]
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// The lock manager.
    #[must_use]
    pub fn locks(&self) -> &LocalLockManager {
        &self.locks
    }

    /// Size of the dynamic record file in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot report its size.
    pub fn string_store_size(&self) -> CoreResult<u64> {
        self.stores.dynamic.size_bytes()
    }

    /// Checks that committed overflow chains and the free list agree.
    ///
    /// # Errors
    ///
    /// Returns an error if a block cannot be read.
    pub fn verify(&self) -> CoreResult<VerifyReport> {
        self.stores.dynamic.verify(&self.stores.chain_heads())
    }

    /// Database directory, for file-backed databases.
    #[must_use]
    pub fn dir(&self) -> Option<&DatabaseDir> {
        self.dir.as_ref()
    }

    /// Returns database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Rolls back open transactions, drains the participant registry and
    /// closes the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the dynamic record file cannot be flushed.
    pub fn close(&self) -> CoreResult<()> {
        let mut is_open = self.is_open.write();
        if !*is_open {
            return Ok(());
        }

        let open: Vec<TransactionId> = self.contexts.lock().drain().map(|(txid, _)| txid).collect();
        for txid in open {
            if let Err(e) = self.tm.rollback(txid) {
                warn!(%txid, error = %e, "rollback on close failed");
            }
            self.locks.release_all(txid);
        }

        self.stores.dynamic.flush()?;
        let released = self.tm.registry().drain();
        *is_open = false;
        info!(participants = released.len(), "database closed");
        Ok(())
    }

    /// Checks if the database is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }
}

fn check_key(key: &str) -> CoreResult<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(CoreError::invalid_operation(format!(
            "property key must be 1..={MAX_KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    Ok(())
}

impl Drop for GraphDatabase {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "close on drop failed");
        }
    }
}

impl std::fmt::Debug for GraphDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphDatabase")
            .field("dir", &self.dir.as_ref().map(DatabaseDir::path))
            .field("open_transactions", &self.contexts.lock().len())
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}
