//! Storage abstraction used by the ledger engine.
//!
//! A `ChainStore` is one transactional key-value container holding a
//! single chain, with four logical namespaces:
//!
//! - **blocks**: `hash -> header_bytes`, plus the well-known meta keys
//!   `l` (tip hash), `b` (tip height, ASCII decimal), `t` (cumulative
//!   transaction count, ASCII decimal), `p2pPrivKey` (local chain only)
//!   and `peerId` (peer replicas only);
//! - **transactions**: `block_hash || '_' || tx_id -> tx_bytes`;
//! - **accounts**: `address -> account_bytes`;
//! - **collections**: `collection_name -> mapping_bytes`.
//!
//! [`ChainStore::put_block`] is the single atomic write: header, every
//! transaction, and the meta updates all land or none do.

use std::sync::Arc;

use crate::types::{Account, Block, BlockHash, DocumentMapping, Transaction, TxId};

/// Meta key of the tip hash.
pub const META_TIP: &[u8] = b"l";
/// Meta key of the tip height.
pub const META_HEIGHT: &[u8] = b"b";
/// Meta key of the cumulative transaction count.
pub const META_TOTAL_TXS: &[u8] = b"t";
/// Meta key of the node identity seed (local chain only).
pub const META_P2P_PRIV_KEY: &[u8] = b"p2pPrivKey";
/// Meta key of the owning peer id (replica chains only).
pub const META_PEER_ID: &[u8] = b"peerId";

/// Storage-level error type shared by all backends.
#[derive(Debug)]
pub enum StorageError {
    /// Failure reported by the backing engine.
    Backend(String),
    /// A stored record did not decode.
    Codec(String),
    /// Required column family was not found.
    MissingColumnFamily(&'static str),
    /// Corrupted or malformed metadata (e.g. tip hash with wrong length).
    CorruptedMeta(&'static str),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Backend(msg) => write!(f, "storage backend error: {msg}"),
            StorageError::Codec(msg) => write!(f, "storage codec error: {msg}"),
            StorageError::MissingColumnFamily(name) => {
                write!(f, "missing column family: {name}")
            }
            StorageError::CorruptedMeta(what) => write!(f, "corrupted metadata: {what}"),
        }
    }
}

impl std::error::Error for StorageError {}

/// Shared handle to a chain store.
pub type SharedStore = Arc<dyn ChainStore>;

/// Abstract storage interface for one chain.
///
/// All methods take `&self`; implementations provide their own interior
/// synchronization. Reads are snapshot-consistent with respect to the
/// atomic block writes.
pub trait ChainStore: Send + Sync {
    /// Atomically persists a block: its header, all its transactions under
    /// the `block_hash || '_' || tx_id` keys, the cumulative transaction
    /// count, and (only when `is_tip`) the tip hash and height.
    fn put_block(&self, block: &Block, is_tip: bool) -> Result<(), StorageError>;

    /// Loads a block header (no transactions) by hash.
    fn get_block(&self, hash: &BlockHash) -> Result<Option<Block>, StorageError>;

    /// Loads every transaction persisted under `block_hash`, in key order.
    fn transactions_in(&self, block_hash: &BlockHash) -> Result<Vec<Transaction>, StorageError>;

    /// Loads one transaction by its block hash and id.
    fn get_transaction(
        &self,
        block_hash: &BlockHash,
        id: &TxId,
    ) -> Result<Option<Transaction>, StorageError>;

    /// The current tip hash, if the chain has been initialized.
    fn tip(&self) -> Result<Option<BlockHash>, StorageError>;

    /// The current tip height, if the chain has been initialized.
    fn height(&self) -> Result<Option<u64>, StorageError>;

    /// The cumulative number of transactions across all persisted blocks.
    fn total_transactions(&self) -> Result<u64, StorageError>;

    fn put_account(&self, address: &str, account: &Account) -> Result<(), StorageError>;
    fn get_account(&self, address: &str) -> Result<Option<Account>, StorageError>;
    fn accounts(&self) -> Result<Vec<(String, Account)>, StorageError>;

    fn put_mapping(&self, mapping: &DocumentMapping) -> Result<(), StorageError>;
    fn get_mapping(&self, collection: &str) -> Result<Option<DocumentMapping>, StorageError>;
    fn mappings(&self) -> Result<Vec<DocumentMapping>, StorageError>;

    /// Reads an arbitrary meta value from the blocks namespace.
    fn get_meta(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Writes an arbitrary meta value into the blocks namespace.
    fn put_meta(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;
}

/// Key of a transaction row: `block_hash || '_' || tx_id`.
pub(crate) fn transaction_key(block_hash: &BlockHash, id: &TxId) -> Vec<u8> {
    let mut key = Vec::with_capacity(65);
    key.extend_from_slice(block_hash.as_bytes());
    key.push(b'_');
    key.extend_from_slice(id.as_bytes());
    key
}

/// Prefix shared by all transaction rows of one block.
pub(crate) fn transaction_prefix(block_hash: &BlockHash) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(33);
    prefix.extend_from_slice(block_hash.as_bytes());
    prefix.push(b'_');
    prefix
}
