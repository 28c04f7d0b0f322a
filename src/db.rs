//! Database registry: an explicit owned store of named databases, each with
//! its own transaction oracle. No process-wide state; callers hold the store
//! and pass it where it is needed.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::{
    mvcc::Timestamp,
    oracle::{Oracle, ReadGuard, WriteTxn},
};

/// Owned registry of named databases.
#[derive(Debug, Default)]
pub struct ColumnStore {
    dbs: RwLock<HashMap<String, Arc<Database>>>,
}

impl ColumnStore {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the database named `name`, creating it on first use.
    pub fn db(&self, name: &str) -> Arc<Database> {
        if let Some(db) = self.dbs.read().unwrap().get(name) {
            return Arc::clone(db);
        }

        let mut dbs = self.dbs.write().unwrap();
        // Re-check: the database may have been created while the shared lock
        // was released.
        if let Some(db) = dbs.get(name) {
            return Arc::clone(db);
        }

        let db = Arc::new(Database {
            name: name.to_string(),
            oracle: Oracle::new(),
        });
        dbs.insert(name.to_string(), Arc::clone(&db));
        db
    }
}

/// A named database and its transaction oracle.
#[derive(Debug)]
pub struct Database {
    name: String,
    oracle: Oracle,
}

impl Database {
    /// The database's registry name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The oracle sequencing this database's transactions.
    pub fn oracle(&self) -> &Oracle {
        &self.oracle
    }

    /// Fixes a reader's snapshot; see [`Oracle::begin_read`].
    pub fn begin_read(&self) -> ReadGuard<'_> {
        self.oracle.begin_read()
    }

    /// Starts a write transaction; see [`Oracle::begin_write`].
    pub fn begin_write(&self) -> WriteTxn<'_> {
        self.oracle.begin_write()
    }

    /// Answers segment visibility for the scan layer; see
    /// [`Oracle::is_visible`].
    pub fn is_visible(&self, handle: Timestamp, snapshot: Timestamp) -> bool {
        self.oracle.is_visible(handle, snapshot)
    }

    /// Garbage-collects settled transaction entries; see [`Oracle::prune`].
    pub fn prune(&self) -> usize {
        self.oracle.prune()
    }
}
