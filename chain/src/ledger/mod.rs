//! The durable, append-only ledger.
//!
//! - [`store::ChainStore`]: the transactional key-value contract a chain is
//!   persisted through (RocksDB in production, an in-memory map in tests).
//! - [`chain::Blockchain`]: the ledger engine: genesis creation, atomic
//!   block appends, tip/height bookkeeping, replica persistence.
//! - [`error::LedgerError`]: typed failures of the above.

pub mod chain;
pub mod error;
pub mod store;

pub use chain::Blockchain;
pub use error::LedgerError;
pub use store::{
    ChainStore, META_HEIGHT, META_P2P_PRIV_KEY, META_PEER_ID, META_TIP, META_TOTAL_TXS,
    SharedStore, StorageError,
};
