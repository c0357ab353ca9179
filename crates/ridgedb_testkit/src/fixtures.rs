//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases
//! and common test scenarios.

use ridgedb_core::{Config, GraphDatabase};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: GraphDatabase,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self {
            db: GraphDatabase::open_in_memory().expect("Failed to open in-memory database"),
            temp_dir: None,
        }
    }

    /// Creates a new file-based test database.
    pub fn file() -> Self {
        Self::file_with_config(Config::default())
    }

    /// Creates a new file-based test database with custom configuration.
    pub fn file_with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = GraphDatabase::open_with_config(&temp_dir.path().join("graph.db"), config)
            .expect("Failed to open file database");
        Self {
            db,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the database path if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().join("graph.db"))
    }

    /// Closes the database and opens it again from disk.
    ///
    /// # Panics
    ///
    /// Panics for in-memory databases.
    pub fn reopen(self) -> Self {
        let config = self.db.config().clone();
        let Self { db, temp_dir } = self;
        let temp_dir = temp_dir.expect("Only file databases can be reopened");
        drop(db);
        let db = GraphDatabase::open_with_config(&temp_dir.path().join("graph.db"), config)
            .expect("Failed to reopen file database");
        Self {
            db,
            temp_dir: Some(temp_dir),
        }
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = GraphDatabase;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust
/// use ridgedb_testkit::with_temp_db;
///
/// with_temp_db(|db| {
///     let node = db.transaction(|db, tx| db.create_node(tx)).unwrap();
///     assert!(db.node_exists(node));
/// });
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&GraphDatabase) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary file-based database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&GraphDatabase, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db.path().expect("File database should have a path");
    f(&test_db.db, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use ridgedb_core::{NodeId, RelationshipId};

    /// Creates a database with `node_count` named nodes.
    pub fn populated_graph(node_count: usize) -> (TestDatabase, Vec<NodeId>) {
        let test_db = TestDatabase::memory();
        let nodes = test_db
            .db
            .transaction(|db, tx| {
                (0..node_count)
                    .map(|i| {
                        let node = db.create_node(tx)?;
                        db.set_property(tx, node.into(), "name", format!("node-{i}").into())?;
                        Ok(node)
                    })
                    .collect()
            })
            .expect("Failed to populate graph");
        (test_db, nodes)
    }

    /// Creates a chain `n0 -> n1 -> ... -> n{len-1}` of relationships.
    pub fn path_graph(len: usize) -> (TestDatabase, Vec<NodeId>, Vec<RelationshipId>) {
        let (test_db, nodes) = populated_graph(len);
        let rels = test_db
            .db
            .transaction(|db, tx| {
                nodes
                    .windows(2)
                    .map(|pair| db.create_relationship(tx, pair[0], pair[1], 1))
                    .collect()
            })
            .expect("Failed to link graph");
        (test_db, nodes, rels)
    }
}
