//! Crash simulation for RidgeDB.
//!
//! A [`MemoryDisk`] holds every file of one database in memory. Each file is
//! handed to the database through a [`CrashableBackend`] that can be told to
//! die after a number of writes, optionally leaving a torn tail behind.
//! Dropping the crashed database and reopening over the same disk then
//! exercises startup recovery exactly as a process restart would.
//!
//! ## Usage
//!
//! ```rust
//! use ridgedb_testkit::crash::{DiskFile, MemoryDisk};
//!
//! let disk = MemoryDisk::new();
//! let db = disk.open().unwrap();
//! let node = db.transaction(|db, tx| db.create_node(tx)).unwrap();
//! drop(db);
//!
//! let db = disk.open().unwrap();
//! assert!(db.node_exists(node));
//! # let _ = DiskFile::TxLog;
//! ```

use ridgedb_core::{Config, CoreResult, GraphDatabase, ResourceManager};
use ridgedb_core::store::StoreBackends;
use ridgedb_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// The files of one database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiskFile {
    /// Coordinator recovery log.
    TxLog,
    /// Node store journal.
    NodeJournal,
    /// Relationship store journal.
    RelationshipJournal,
    /// Property store journal.
    PropertyJournal,
    /// Dynamic record blocks.
    StringBlocks,
    /// Overflow store journal.
    StringJournal,
}

impl DiskFile {
    /// Every file, in a stable order.
    pub const ALL: [DiskFile; 6] = [
        Self::TxLog,
        Self::NodeJournal,
        Self::RelationshipJournal,
        Self::PropertyJournal,
        Self::StringBlocks,
        Self::StringJournal,
    ];
}

/// Shared crash trigger of one file.
#[derive(Debug)]
pub struct CrashSwitch {
    writes_left: AtomicUsize,
    torn: AtomicBool,
    crashed: AtomicBool,
}

impl Default for CrashSwitch {
    fn default() -> Self {
        Self {
            writes_left: AtomicUsize::new(usize::MAX),
            torn: AtomicBool::new(false),
            crashed: AtomicBool::new(false),
        }
    }
}

impl CrashSwitch {
    /// Lets `writes` more writes through, then fails every write after.
    pub fn crash_after_writes(&self, writes: usize) {
        self.writes_left.store(writes, Ordering::SeqCst);
    }

    /// Makes the failing write store the first half of its data.
    pub fn tear_last_write(&self, torn: bool) {
        self.torn.store(torn, Ordering::SeqCst);
    }

    /// Whether a write has been refused.
    #[must_use]
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Disarms the switch.
    pub fn reset(&self) {
        self.writes_left.store(usize::MAX, Ordering::SeqCst);
        self.torn.store(false, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
    }

    /// Consumes one write. `Err` carries how many bytes of it to keep.
    fn take_write(&self, len: usize) -> Result<(), usize> {
        if self.crashed.load(Ordering::SeqCst) {
            return Err(0);
        }
        let left = self.writes_left.load(Ordering::SeqCst);
        if left == 0 {
            self.crashed.store(true, Ordering::SeqCst);
            let keep = if self.torn.load(Ordering::SeqCst) { len / 2 } else { 0 };
            return Err(keep);
        }
        if left != usize::MAX {
            self.writes_left.store(left - 1, Ordering::SeqCst);
        }
        Ok(())
    }
}

fn crash_error(what: &str) -> StorageError {
    StorageError::Io(std::io::Error::other(format!("simulated crash during {what}")))
}

/// A storage backend that fails once its [`CrashSwitch`] trips.
#[derive(Debug)]
pub struct CrashableBackend {
    inner: InMemoryBackend,
    switch: Arc<CrashSwitch>,
}

impl CrashableBackend {
    /// Wraps `inner`, sharing its buffer.
    #[must_use]
    pub fn new(inner: InMemoryBackend, switch: Arc<CrashSwitch>) -> Self {
        Self { inner, switch }
    }

    fn dead(&self) -> bool {
        self.switch.has_crashed()
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        match self.switch.take_write(data.len()) {
            Ok(()) => self.inner.append(data),
            Err(keep) => {
                if keep > 0 {
                    self.inner.append(&data[..keep])?;
                }
                Err(crash_error("append"))
            }
        }
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        match self.switch.take_write(data.len()) {
            Ok(()) => self.inner.write_at(offset, data),
            Err(keep) => {
                if keep > 0 {
                    self.inner.write_at(offset, &data[..keep])?;
                }
                Err(crash_error("write"))
            }
        }
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.dead() {
            return Err(crash_error("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.dead() {
            return Err(crash_error("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        if self.dead() {
            return Err(crash_error("truncate"));
        }
        self.inner.truncate(new_size)
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        // A rename either lands whole or not at all, so a crash is never torn.
        match self.switch.take_write(data.len()) {
            Ok(()) => self.inner.replace(data),
            Err(_) => Err(crash_error("replace")),
        }
    }
}

/// Every file of one database, kept in memory across reopens.
#[derive(Debug)]
pub struct MemoryDisk {
    files: [(InMemoryBackend, Arc<CrashSwitch>); DiskFile::ALL.len()],
    config: Config,
}

impl Default for MemoryDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDisk {
    /// An empty disk opened with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// An empty disk opened with `config`.
    #[must_use]
    pub fn with_config(config: Config) -> Self {
        let files = DiskFile::ALL.map(|_| (InMemoryBackend::new(), Arc::new(CrashSwitch::default())));
        Self { files, config }
    }

    /// The configuration databases on this disk are opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replaces the configuration used by later opens.
    pub fn set_config(&mut self, config: Config) {
        self.config = config;
    }

    /// The crash switch of `file`.
    #[must_use]
    pub fn switch(&self, file: DiskFile) -> Arc<CrashSwitch> {
        self.entry(file).1.clone()
    }

    /// Bytes currently stored in `file`.
    #[must_use]
    pub fn bytes(&self, file: DiskFile) -> Vec<u8> {
        self.entry(file).0.data()
    }

    /// Disarms every crash switch.
    pub fn heal(&self) {
        for (_, switch) in &self.files {
            switch.reset();
        }
    }

    fn entry(&self, file: DiskFile) -> &(InMemoryBackend, Arc<CrashSwitch>) {
        &self.files[file as usize]
    }

    fn backend(&self, file: DiskFile) -> Box<dyn StorageBackend> {
        let (data, switch) = self.entry(file);
        Box::new(CrashableBackend::new(data.clone(), Arc::clone(switch)))
    }

    /// Backends for the recovery log and the stores.
    #[must_use]
    pub fn backends(&self) -> (Box<dyn StorageBackend>, StoreBackends) {
        let stores = StoreBackends {
            node_journal: self.backend(DiskFile::NodeJournal),
            relationship_journal: self.backend(DiskFile::RelationshipJournal),
            property_journal: self.backend(DiskFile::PropertyJournal),
            string_blocks: self.backend(DiskFile::StringBlocks),
            string_journal: self.backend(DiskFile::StringJournal),
        };
        (self.backend(DiskFile::TxLog), stores)
    }

    /// Opens a database over this disk, running recovery.
    ///
    /// Every crash switch is disarmed first, as a restarted process would
    /// find a working disk.
    ///
    /// # Errors
    ///
    /// Returns whatever opening the database returns.
    pub fn open(&self) -> CoreResult<GraphDatabase> {
        self.open_with(Vec::new())
    }

    /// Opens a database whose transactions may also enlist `resources`.
    ///
    /// # Errors
    ///
    /// Returns whatever opening the database returns.
    pub fn open_with(&self, resources: Vec<Arc<dyn ResourceManager>>) -> CoreResult<GraphDatabase> {
        self.heal();
        let (log, stores) = self.backends();
        GraphDatabase::open_with_resources(self.config.clone(), log, stores, resources)
    }
}
