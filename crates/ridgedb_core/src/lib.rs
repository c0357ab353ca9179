//! # RidgeDB Core
//!
//! Durability core of the RidgeDB graph database.
//!
//! This crate provides:
//! - A two-phase commit transaction coordinator with a recovery log
//! - The resource-manager contract participants implement
//! - Journaled node, relationship, property and overflow stores
//! - A dynamic record store for values too long for a property slot
//! - Startup recovery that reconciles participants with the log
//!
//! ## Example
//!
//! ```rust
//! use ridgedb_core::GraphDatabase;
//!
//! let db = GraphDatabase::open_in_memory().unwrap();
//! let node = db
//!     .transaction(|db, tx| {
//!         let node = db.create_node(tx)?;
//!         db.set_property(tx, node.into(), "name", "Mattias Yu".into())?;
//!         Ok(node)
//!     })
//!     .unwrap();
//! assert_eq!(
//!     db.get_property(node.into(), "name").unwrap(),
//!     Some("Mattias Yu".into())
//! );
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod database;
mod dir;
pub mod dynamic;
mod error;
pub mod index;
pub mod lock;
pub mod log;
pub mod resource;
pub mod store;
pub mod transaction;
pub mod txlog;
mod types;

pub use config::{Config, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
pub use database::GraphDatabase;
pub use dir::{DatabaseDir, DATA_FILES, TX_LOG_FILE};
pub use dynamic::{DynamicStore, VerifyReport};
pub use error::{CoreError, CoreResult};
pub use resource::{EndFlags, RecoverFlags, ResourceManager, ResourceRegistry, StartFlags, Vote};
pub use transaction::{Enlistment, RecoveryReport, TransactionInfo, TransactionManager, TransactionState};
pub use txlog::{Decision, LogEntry, RecoveryLog};
pub use types::{EntityRef, NodeId, RecordId, RelationshipId, TransactionId, Xid};

pub use ridgedb_codec::{PropertyType, PropertyValue};
