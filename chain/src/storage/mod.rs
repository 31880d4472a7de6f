//! Storage backends for the ledger.
//!
//! This module provides concrete implementations of
//! [`crate::ledger::ChainStore`]:
//!
//! - an in-memory store ([`mem::MemChainStore`]) suitable for tests,
//! - a RocksDB-backed store ([`rocksdb::RocksDbChainStore`]) for
//!   persistent nodes.

pub mod mem;
pub mod rocksdb;

pub use mem::MemChainStore;
pub use rocksdb::{RocksDbChainStore, db_exists};
