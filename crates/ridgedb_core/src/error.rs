//! Error types for RidgeDB core.

use crate::types::TransactionId;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in RidgeDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] ridgedb_storage::StorageError),

    /// Property value codec error.
    #[error("codec error: {0}")]
    Codec(#[from] ridgedb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A resource manager could not durably persist a step.
    #[error("resource '{resource}' failed: {message}")]
    ResourceFailure {
        /// Name of the failing resource manager.
        resource: String,
        /// Description of the failure.
        message: String,
    },

    /// A resource manager was driven out of protocol order.
    #[error("protocol violation on '{resource}': {message}")]
    ProtocolViolation {
        /// Name of the resource manager that rejected the call.
        resource: String,
        /// What was wrong with the call.
        message: String,
    },

    /// The transaction was rolled back instead of committed.
    #[error("transaction {txid} rolled back: {reason}")]
    RollbackRequired {
        /// The transaction.
        txid: TransactionId,
        /// Why it could not commit.
        reason: String,
    },

    /// Some participants committed and some did not.
    #[error("transaction {txid} has a heuristic outcome: committed {committed:?}, failed {failed:?}")]
    HeuristicMixed {
        /// The transaction.
        txid: TransactionId,
        /// Participants that committed.
        committed: Vec<String>,
        /// Participants whose commit failed.
        failed: Vec<String>,
    },

    /// A participant did not answer within the configured timeout.
    #[error("transaction {txid}: '{resource}' timed out during {operation}")]
    Timeout {
        /// The transaction.
        txid: TransactionId,
        /// The participant that did not answer.
        resource: String,
        /// The protocol step.
        operation: &'static str,
    },

    /// An optional operation is not implemented by this backend.
    #[error("operation not supported: {operation}")]
    UnsupportedOperation {
        /// The operation that was requested.
        operation: &'static str,
    },

    /// Recovery has not completed; no transaction may begin.
    #[error("recovery has not completed")]
    RecoveryIncomplete,

    /// A participant could not take part in recovery.
    #[error("recovery failed on '{resource}': {message}")]
    RecoveryFailed {
        /// The participant.
        resource: String,
        /// Description of the failure.
        message: String,
    },

    /// A durable log is corrupted or invalid.
    #[error("log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// A stored record is malformed.
    #[error("invalid record: {message}")]
    InvalidRecord {
        /// Description of the problem.
        message: String,
    },

    /// Another transaction holds a conflicting lock.
    #[error("lock unavailable on {entity}")]
    LockUnavailable {
        /// The contended entity.
        entity: String,
    },

    /// Waiting for the lock would deadlock.
    #[error("deadlock detected for transaction {txid} on {entity}")]
    Deadlock {
        /// The transaction that asked for the lock.
        txid: TransactionId,
        /// The contended entity.
        entity: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// A referenced entity or transaction does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// Database is already open or locked.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// Database is closed.
    #[error("database is closed")]
    DatabaseClosed,
}

impl CoreError {
    /// Creates a resource failure error.
    pub fn resource_failure(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ResourceFailure {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol violation error.
    pub fn protocol_violation(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Creates a rollback-required error.
    pub fn rollback_required(txid: TransactionId, reason: impl Into<String>) -> Self {
        Self::RollbackRequired {
            txid,
            reason: reason.into(),
        }
    }

    /// Creates a recovery failure error.
    pub fn recovery_failed(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RecoveryFailed {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Creates a log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid record error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Whether this error is a participant's protocol rejection.
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }
}
