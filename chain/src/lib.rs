//! docledger core library.
//!
//! This crate provides the building blocks of a tamper-evident document
//! datastore:
//!
//! - strongly-typed domain records (`types`),
//! - hashing, signatures and identities (`crypto`),
//! - merkle commitments and inclusion proofs (`merkle`),
//! - the append-only ledger and its storage backends (`ledger`, `storage`),
//! - admission validation (`validation`) and the pooling/block-cut
//!   pipeline (`pool`),
//! - the per-collection search adapter (`search`),
//! - the account registry and challenge-word auth (`accounts`),
//! - the peer overlay and replication protocol (`p2p`),
//! - Prometheus metrics (`metrics`),
//! - and a top-level node configuration (`config`).
//!
//! The `docledger` binary in the sibling `api-gateway` crate composes
//! these pieces into a complete node.

pub mod accounts;
pub mod config;
pub mod crypto;
pub mod ledger;
pub mod merkle;
pub mod metrics;
pub mod p2p;
pub mod pool;
pub mod search;
pub mod storage;
pub mod types;
pub mod validation;

// Re-export top-level configuration types.
pub use config::{HttpConfig, MetricsConfig, NodeConfig};

// Re-export the core ledger types and traits.
pub use ledger::{Blockchain, ChainStore, LedgerError, SharedStore, StorageError};

// Re-export storage backends.
pub use storage::{MemChainStore, RocksDbChainStore, db_exists};

// Re-export the admission pipeline.
pub use pool::{AdmissionError, PoolConfig, PutOutcome, Receiver, SchedulerContext, run_scheduler};

// Re-export the search adapter surface.
pub use search::{Search, SearchError, SearchHits, SearchRequest};

// Re-export accounts and crypto entry points.
pub use accounts::{AccountRegistry, CHALLENGE_TTL, RegistryError};
pub use crypto::{NodeIdentity, UserKeypair, keccak256, public_key_to_address, sha256};

// Re-export the overlay.
pub use p2p::{ChainSet, P2pConfig, P2pNode, RocksDbPeerOpener};

// Re-export metrics.
pub use metrics::{MetricsRegistry, NodeMetrics, run_prometheus_http_server};

// Re-export domain types at the crate root for convenience.
pub use merkle::MerkleTree;
pub use types::*;
