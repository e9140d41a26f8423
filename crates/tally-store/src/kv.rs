//! Key-value backends.
//!
//! [`KvStore`] is the storage contract the ledger is written against: point
//! reads, atomic multi-key batches and a full scan. [`RocksKv`] persists to
//! RocksDB; [`MemoryKv`] keeps an ordered map for tests and tooling.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::RwLock;
use rocksdb::{DB, IteratorMode, Options, WriteBatch};

use tally_core::error::TallyError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Ordered list of writes applied atomically by [`KvStore::write`].
#[derive(Debug, Clone, Default)]
pub struct KvBatch {
    ops: Vec<BatchOp>,
}

impl KvBatch {
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put(key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TallyError>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), TallyError>;

    fn delete(&self, key: &[u8]) -> Result<(), TallyError>;

    /// Apply every operation of `batch` or none of them.
    fn write(&self, batch: KvBatch) -> Result<(), TallyError>;

    /// Every key-value pair in key order.
    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, TallyError>;

    /// Persist buffered writes. No-op for backends without buffering.
    fn flush(&self) -> Result<(), TallyError> {
        Ok(())
    }
}

// --- RocksDB ---

/// RocksDB-backed store. A single keyspace; indexes are separated by key
/// prefix (see [`crate::keys`]).
pub struct RocksKv {
    db: DB,
}

impl RocksKv {
    /// Open or create a RocksDB database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TallyError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path.as_ref()).map_err(|e| TallyError::Storage(e.to_string()))?;
        Ok(Self { db })
    }

    /// Merge SSTables and reclaim space held by deleted keys.
    pub fn compact(&self) {
        self.db.compact_range(None::<&[u8]>, None::<&[u8]>);
    }
}

impl KvStore for RocksKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TallyError> {
        self.db.get(key).map_err(|e| TallyError::Storage(e.to_string()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), TallyError> {
        self.db.put(key, value).map_err(|e| TallyError::Storage(e.to_string()))
    }

    fn delete(&self, key: &[u8]) -> Result<(), TallyError> {
        self.db.delete(key).map_err(|e| TallyError::Storage(e.to_string()))
    }

    fn write(&self, batch: KvBatch) -> Result<(), TallyError> {
        let mut wb = WriteBatch::default();
        for op in batch.ops {
            match op {
                BatchOp::Put(key, value) => wb.put(key, value),
                BatchOp::Delete(key) => wb.delete(key),
            }
        }
        self.db.write(wb).map_err(|e| TallyError::Storage(e.to_string()))
    }

    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, TallyError> {
        self.db
            .iterator(IteratorMode::Start)
            .map(|item| {
                item.map(|(k, v)| (k.into_vec(), v.into_vec()))
                    .map_err(|e| TallyError::Storage(e.to_string()))
            })
            .collect()
    }

    fn flush(&self) -> Result<(), TallyError> {
        self.db.flush().map_err(|e| TallyError::Storage(e.to_string()))
    }
}

// --- In-memory ---

/// Ordered in-memory store. Batches are applied under one write lock.
#[derive(Default)]
pub struct MemoryKv {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TallyError> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), TallyError> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), TallyError> {
        self.map.write().remove(key);
        Ok(())
    }

    fn write(&self, batch: KvBatch) -> Result<(), TallyError> {
        let mut map = self.map.write();
        for op in batch.ops {
            match op {
                BatchOp::Put(key, value) => {
                    map.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, TallyError> {
        Ok(self.map.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}
