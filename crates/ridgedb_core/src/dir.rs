//! Database directory management.
//!
//! ```text
//! <db_path>/
//! ├─ LOCK                                  # Advisory lock for single-process access
//! ├─ tx.log                                # Coordinator recovery log
//! ├─ neostore.nodestore.journal            # Node store branch journal
//! ├─ neostore.relationshipstore.journal    # Relationship store branch journal
//! ├─ neostore.propertystore.journal        # Property store branch journal
//! ├─ neostore.propertystore.strings        # Dynamic record blocks
//! └─ neostore.propertystore.strings.journal
//! ```

use crate::error::{CoreError, CoreResult};
use crate::store::StoreBackends;
use fs2::FileExt;
use ridgedb_storage::{FileBackend, StorageBackend};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
/// File name of the coordinator recovery log.
pub const TX_LOG_FILE: &str = "tx.log";
const NODE_JOURNAL: &str = "neostore.nodestore.journal";
const RELATIONSHIP_JOURNAL: &str = "neostore.relationshipstore.journal";
const PROPERTY_JOURNAL: &str = "neostore.propertystore.journal";
const STRING_BLOCKS: &str = "neostore.propertystore.strings";
const STRING_JOURNAL: &str = "neostore.propertystore.strings.journal";

/// Every data file of a database, in a stable order.
pub const DATA_FILES: [&str; 6] = [
    TX_LOG_FILE,
    NODE_JOURNAL,
    RELATIONSHIP_JOURNAL,
    PROPERTY_JOURNAL,
    STRING_BLOCKS,
    STRING_JOURNAL,
];

/// Manages the database directory structure and file locking.
///
/// Holds an exclusive advisory lock on `LOCK` for as long as it lives, so
/// only one process opens a database at a time.
#[derive(Debug)]
pub struct DatabaseDir {
    path: PathBuf,
    _lock_file: File,
}

impl DatabaseDir {
    /// Opens or creates a database directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the directory is missing and
    /// `create_if_missing` is false, `DatabaseLocked` if another process
    /// holds the lock, and I/O errors otherwise.
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::not_found(format!(
                    "database directory {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_operation(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path to the database directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the recovery log.
    #[must_use]
    pub fn tx_log_path(&self) -> PathBuf {
        self.path.join(TX_LOG_FILE)
    }

    /// Returns the path to the dynamic record block file.
    #[must_use]
    pub fn string_blocks_path(&self) -> PathBuf {
        self.path.join(STRING_BLOCKS)
    }

    /// Opens the recovery log file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open_tx_log(&self) -> CoreResult<Box<dyn StorageBackend>> {
        Ok(Box::new(FileBackend::open(&self.tx_log_path())?))
    }

    /// Opens every store file.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be opened.
    pub fn open_stores(&self) -> CoreResult<StoreBackends> {
        let open = |name: &str| -> CoreResult<Box<dyn StorageBackend>> {
            Ok(Box::new(FileBackend::open(&self.path.join(name))?))
        };
        Ok(StoreBackends {
            node_journal: open(NODE_JOURNAL)?,
            relationship_journal: open(RELATIONSHIP_JOURNAL)?,
            property_journal: open(PROPERTY_JOURNAL)?,
            string_blocks: open(STRING_BLOCKS)?,
            string_journal: open(STRING_JOURNAL)?,
        })
    }

    /// Sizes of the data files that exist, in [`DATA_FILES`] order.
    ///
    /// # Errors
    ///
    /// Returns an error if file metadata cannot be read.
    pub fn file_sizes(&self) -> CoreResult<Vec<(&'static str, u64)>> {
        let mut sizes = Vec::new();
        for name in DATA_FILES {
            let path = self.path.join(name);
            if path.exists() {
                sizes.push((name, fs::metadata(&path)?.len()));
            }
        }
        Ok(sizes)
    }
}
