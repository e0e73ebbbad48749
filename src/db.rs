//! Abstract interface to the durable key-value backend.
//!
//! The state layer never talks to a concrete storage engine. Everything it
//! persists goes through [Database]: atomic single-key reads and writes plus
//! an atomic multi-key [Batch] used when a block commit must land several
//! records together. Retry policy belongs to the backend, not to this crate;
//! a backend failure is propagated as [Error] and treated as fatal by callers.
//!
//! [MemDb] is an in-memory implementation backing the crate's tests. It is
//! also a reasonable choice for ephemeral nodes that do not need to survive
//! a restart.

use std::{collections::BTreeMap, sync::RwLock};
use thiserror::Error;

/// Errors surfaced by a [Database] backend.
#[derive(Debug, Error)]
pub enum Error {
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// An ordered collection of writes applied atomically.
#[derive(Default)]
pub struct Batch {
    ops: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Batch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a write of `value` at `key`.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: Vec<u8>) {
        self.ops.push((key.into(), value));
    }

    /// Number of queued writes.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the batch contains no writes.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Consume the batch, yielding the queued writes in order.
    pub fn into_ops(self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.ops
    }
}

/// A durable key-value store.
///
/// Implementations must provide atomic single-key operations and an atomic
/// [Batch] commit: after a crash, either every write in a batch is visible or
/// none is. Reads may run concurrently with the single logical writer.
pub trait Database: Send + Sync {
    /// Fetch the value stored at `key`, if any.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error>;

    /// Store `value` at `key`, overwriting any prior value.
    fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), Error>;

    /// Whether any value is stored at `key`.
    fn has(&self, key: &[u8]) -> Result<bool, Error> {
        Ok(self.get(key)?.is_some())
    }

    /// Apply every write in `batch` atomically.
    fn write_batch(&self, batch: Batch) -> Result<(), Error>;
}

/// In-memory [Database] over a [BTreeMap].
///
/// All operations take the lock for the shortest possible window, so readers
/// only contend with an in-flight batch commit.
#[derive(Default)]
pub struct MemDb {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemDb {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Database for MemDb {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let entries = self.entries.read().unwrap();
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: Vec<u8>) -> Result<(), Error> {
        let mut entries = self.entries.write().unwrap();
        entries.insert(key.to_vec(), value);
        Ok(())
    }

    fn has(&self, key: &[u8]) -> Result<bool, Error> {
        let entries = self.entries.read().unwrap();
        Ok(entries.contains_key(key))
    }

    fn write_batch(&self, batch: Batch) -> Result<(), Error> {
        let mut entries = self.entries.write().unwrap();
        for (key, value) in batch.into_ops() {
            entries.insert(key, value);
        }
        Ok(())
    }
}
