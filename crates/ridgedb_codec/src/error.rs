//! Error types for the codec crate.

use crate::short_string::ShortStringTable;
use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while decoding stored property values.
///
/// Encoding never fails: a value that does not fit inline is an expected
/// outcome, reported as `None` by the short-string encoder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The inline word carries a table selector that no table uses.
    #[error("unknown short-string table selector {selector}")]
    UnknownSelector {
        /// The selector found in the word.
        selector: u8,
    },

    /// A packed code has no character in its table.
    #[error("code {code} is not defined in the {table:?} table")]
    UnknownCode {
        /// The table the word was packed with.
        table: ShortStringTable,
        /// The offending code.
        code: u8,
    },

    /// Bits after the terminating padding code are not zero.
    #[error("short string has non-zero bits after its last character")]
    DirtyPadding,

    /// The property type byte is not recognised.
    #[error("unknown property type {0}")]
    UnknownPropertyType(u8),

    /// The value kind is stored in overflow records, not inline (or vice versa).
    #[error("property type {kind} is not stored {expected}")]
    WrongRepresentation {
        /// The property type that was given.
        kind: &'static str,
        /// The representation the caller asked for.
        expected: &'static str,
    },

    /// Overflow payload was not valid UTF-8.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,
}

impl CodecError {
    /// Creates a wrong-representation error.
    pub fn wrong_representation(kind: &'static str, expected: &'static str) -> Self {
        Self::WrongRepresentation { kind, expected }
    }
}
