//! Dynamic record store.
//!
//! Values too large for an inline property slot are stored as chains of
//! fixed-size blocks:
//!
//! ```text
//! | in_use (1) | data_len (2) | data (block_size - 11) | next (8) |
//! ```
//!
//! `next` is the id of the following block, or [`NO_NEXT`] at the end of
//! the chain. Block `n` lives at byte offset `n * block_size`.
//!
//! ## Allocation
//!
//! Free block ids are kept in an ordered set rebuilt from the in-use flags
//! when the store opens. Allocation always takes the lowest free ids and
//! only extends the file when the set is empty, so freed space is reused
//! before the store grows. Every free-list change happens under one
//! store-wide lock; two callers can never be handed the same id.

mod record;
mod store;

pub use record::{DynamicRecord, BLOCK_HEADER_SIZE, NO_NEXT};
pub use store::{DynamicStore, VerifyReport};
