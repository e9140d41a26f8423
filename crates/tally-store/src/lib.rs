//! # tally-store
//! Indexed, atomically committed ledger storage for Tally.
//!
//! - [`kv`]: key-value backends (RocksDB, in-memory)
//! - [`keys`]: key layout of the ledger indexes
//! - [`ledger`]: validation-gated block commit, tail removal and queries
//! - [`config`]: ledger configuration

pub mod config;
pub mod keys;
pub mod kv;
pub mod ledger;

pub use config::LedgerConfig;
pub use kv::{KvBatch, KvStore, MemoryKv, RocksKv};
pub use ledger::{Ledger, StoreView};
