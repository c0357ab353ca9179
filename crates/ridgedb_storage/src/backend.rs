//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level storage backend for RidgeDB.
///
/// Backends are **opaque byte stores**. Log-style users (recovery log,
/// branch journals) only ever `append`; block-style users (the dynamic
/// record store) overwrite fixed-size blocks in place with `write_at`.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `write_at` never leaves a hole: `offset` must be `<= size()`
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `flush` ensures all written data is durable
/// - Backends must be `Send + Sync` for concurrent access
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read would extend beyond the current size
    /// or an I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the storage.
    ///
    /// Returns the offset where the data was written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Overwrites bytes starting at `offset`, growing the storage when the
    /// write runs past the current end.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::WriteGap`] if `offset` is beyond the
    /// current size, or an I/O error.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Flushes all pending writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the storage in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// This is a stronger guarantee than `flush` - it ensures that
    /// file metadata (size, timestamps) is also durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the storage to the given size.
    ///
    /// Used to rotate the recovery log once every entry is resolved.
    ///
    /// # Errors
    ///
    /// Returns an error if the truncation fails or `new_size` is greater
    /// than the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically replaces the whole contents with `data`.
    ///
    /// After a crash the storage holds either the old bytes or `data`,
    /// never a mix. Branch journals use this to compact themselves.
    ///
    /// # Errors
    ///
    /// Returns an error if the new contents cannot be made durable. The old
    /// contents are left in place.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;
}
