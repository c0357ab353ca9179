//! # RidgeDB Storage
//!
//! Storage backend trait and implementations for RidgeDB.
//!
//! Backends are **opaque byte stores**. They know nothing about recovery
//! logs, branch journals or dynamic record blocks; the core crate owns all
//! interpretation of the bytes.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral stores
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use ridgedb_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! backend.write_at(offset, b"HELLO").unwrap();
//! assert_eq!(backend.read_at(0, 11).unwrap(), b"HELLO world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::{FileBackend, OpenMode};
pub use memory::InMemoryBackend;
