//! # RidgeDB Testkit
//!
//! Test utilities for RidgeDB.
//!
//! This crate provides:
//! - Test fixtures and database helpers
//! - Property-based test generators using proptest
//! - An in-memory disk whose files can be made to crash mid-write
//! - A scripted participant for driving the coordinator
//!
//! ## Usage
//!
//! ```rust
//! use ridgedb_testkit::prelude::*;
//!
//! with_temp_db(|db| {
//!     let node = db.transaction(|db, tx| db.create_node(tx)).unwrap();
//!     assert!(db.node_exists(node));
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod resource;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::resource::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use resource::*;
