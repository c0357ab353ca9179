//! Database configuration.

use crate::error::{CoreError, CoreResult};
use std::time::Duration;

/// Smallest usable dynamic record block: header, one data byte, next pointer.
pub const MIN_BLOCK_SIZE: usize = 12;

/// Largest block whose data length still fits the 16-bit length field.
pub const MAX_BLOCK_SIZE: usize = u16::MAX as usize + 11;

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether logs are fsynced at every durable step (safer but slower).
    pub sync_on_commit: bool,

    /// Size in bytes of one dynamic record block.
    pub block_size: usize,

    /// How long the coordinator waits for a participant call.
    ///
    /// `None` waits forever.
    pub transaction_timeout: Option<Duration>,

    /// Recovery log size above which it is truncated once nothing is unresolved.
    pub max_log_size: u64,

    /// Store journal size above which it is compacted into a checkpoint on open.
    pub max_journal_size: u64,

    /// Let startup proceed when a participant cannot take part in recovery.
    pub force_recovery: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            block_size: 128,
            transaction_timeout: None,
            max_log_size: 16 * 1024 * 1024, // 16 MB
            max_journal_size: 64 * 1024 * 1024, // 64 MB
            force_recovery: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync logs at every durable step.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the dynamic record block size.
    #[must_use]
    pub const fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the per-call participant timeout.
    #[must_use]
    pub const fn transaction_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    /// Sets the recovery log rotation threshold.
    #[must_use]
    pub const fn max_log_size(mut self, size: u64) -> Self {
        self.max_log_size = size;
        self
    }

    /// Sets the store journal compaction threshold.
    #[must_use]
    pub const fn max_journal_size(mut self, size: u64) -> Self {
        self.max_journal_size = size;
        self
    }

    /// Sets the recovery override.
    #[must_use]
    pub const fn force_recovery(mut self, value: bool) -> Self {
        self.force_recovery = value;
        self
    }

    /// Checks that the values can be used together.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the block size is out of range.
    pub fn validate(&self) -> CoreResult<()> {
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size) {
            return Err(CoreError::invalid_operation(format!(
                "block size {} outside {MIN_BLOCK_SIZE}..={MAX_BLOCK_SIZE}",
                self.block_size
            )));
        }
        Ok(())
    }
}
