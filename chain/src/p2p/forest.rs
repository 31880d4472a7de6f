//! The chain set: the writable local chain plus read-only replicas of
//! every known peer's chain.
//!
//! Each chain is an independent store keyed by the owning peer id.
//! Replica stores are created lazily when the first block from a new peer
//! arrives, and reopened from `<data_dir>/peers/<peer_id_hex>.db` on
//! restart. Cross-chain lookups (blocks, transactions) observe the union
//! of all chains.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::ledger::{Blockchain, ChainStore, LedgerError, META_PEER_ID, SharedStore, StorageError};
use crate::storage::RocksDbChainStore;
use crate::types::{Block, BlockHash, PeerId, Transaction, TxId};

/// Opens (and enumerates) the per-peer replica stores.
pub trait PeerStoreOpener: Send + Sync {
    /// Opens or creates the store for `peer_id`'s replica chain.
    fn open(&self, peer_id: &PeerId) -> Result<SharedStore, StorageError>;

    /// Peer ids with a replica store already on disk.
    fn existing(&self) -> Result<Vec<PeerId>, StorageError>;
}

/// Disk-backed opener: one RocksDB database per peer under `peers/`.
pub struct RocksDbPeerOpener {
    peers_dir: std::path::PathBuf,
}

impl RocksDbPeerOpener {
    pub fn new(data_dir: &std::path::Path) -> std::io::Result<Self> {
        let peers_dir = data_dir.join("peers");
        std::fs::create_dir_all(&peers_dir)?;
        Ok(Self { peers_dir })
    }
}

impl PeerStoreOpener for RocksDbPeerOpener {
    fn open(&self, peer_id: &PeerId) -> Result<SharedStore, StorageError> {
        let path = self.peers_dir.join(format!("{}.db", peer_id.to_hex()));
        let store = RocksDbChainStore::open(&path)?;
        store.put_meta(META_PEER_ID, peer_id.as_bytes())?;
        Ok(Arc::new(store))
    }

    fn existing(&self) -> Result<Vec<PeerId>, StorageError> {
        let mut out = Vec::new();
        let entries = std::fs::read_dir(&self.peers_dir)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::Backend(e.to_string()))?;
            let name = entry.file_name();
            let Some(hex_part) = name.to_str().and_then(|n| n.strip_suffix(".db")) else {
                continue;
            };
            if let Some(peer_id) = PeerId::from_hex(hex_part) {
                out.push(peer_id);
            }
        }
        Ok(out)
    }
}

/// In-memory opener for tests.
#[derive(Default)]
pub struct MemPeerOpener {
    stores: Mutex<HashMap<PeerId, SharedStore>>,
}

impl MemPeerOpener {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PeerStoreOpener for MemPeerOpener {
    fn open(&self, peer_id: &PeerId) -> Result<SharedStore, StorageError> {
        let mut stores = self.stores.lock().expect("peer opener lock poisoned");
        let store = stores
            .entry(*peer_id)
            .or_insert_with(|| Arc::new(crate::storage::MemChainStore::new()));
        Ok(store.clone())
    }

    fn existing(&self) -> Result<Vec<PeerId>, StorageError> {
        Ok(Vec::new())
    }
}

/// The local chain and all peer replica chains of one node.
pub struct ChainSet {
    local: Arc<Blockchain>,
    peers: Mutex<HashMap<PeerId, Arc<Blockchain>>>,
    opener: Box<dyn PeerStoreOpener>,
}

impl ChainSet {
    /// Wraps the local chain and reopens every replica the opener knows
    /// about.
    pub fn open(
        local: Arc<Blockchain>,
        opener: Box<dyn PeerStoreOpener>,
    ) -> Result<Self, StorageError> {
        let mut peers = HashMap::new();
        for peer_id in opener.existing()? {
            let store = opener.open(&peer_id)?;
            peers.insert(peer_id, Arc::new(Blockchain::replica(store, peer_id)));
        }
        if !peers.is_empty() {
            tracing::info!(count = peers.len(), "opened existing peer replica chains");
        }
        Ok(ChainSet {
            local,
            peers: Mutex::new(peers),
            opener,
        })
    }

    pub fn local(&self) -> &Arc<Blockchain> {
        &self.local
    }

    /// The replica chain of `peer_id`, if one exists.
    pub fn peer(&self, peer_id: &PeerId) -> Option<Arc<Blockchain>> {
        self.peers
            .lock()
            .expect("chain set lock poisoned")
            .get(peer_id)
            .cloned()
    }

    /// The replica chain of `peer_id`, created on first use.
    pub fn peer_or_create(&self, peer_id: &PeerId) -> Result<Arc<Blockchain>, StorageError> {
        let mut peers = self.peers.lock().expect("chain set lock poisoned");
        if let Some(chain) = peers.get(peer_id) {
            return Ok(chain.clone());
        }
        let store = self.opener.open(peer_id)?;
        let chain = Arc::new(Blockchain::replica(store, *peer_id));
        peers.insert(*peer_id, chain.clone());
        Ok(chain)
    }

    /// Persists a block into `peer_id`'s replica chain.
    pub fn persist_peer_block(
        &self,
        peer_id: &PeerId,
        block: &Block,
        is_tip: bool,
    ) -> Result<(), LedgerError> {
        let chain = self.peer_or_create(peer_id).map_err(LedgerError::Storage)?;
        chain.persist_block(block, is_tip)
    }

    /// Every chain this node holds: the local one first, then replicas.
    pub fn all(&self) -> Vec<Arc<Blockchain>> {
        let peers = self.peers.lock().expect("chain set lock poisoned");
        let mut out = Vec::with_capacity(peers.len() + 1);
        out.push(self.local.clone());
        out.extend(peers.values().cloned());
        out
    }

    /// Union lookup of a block header across all chains.
    pub fn find_block(&self, hash: &BlockHash) -> Result<Option<Block>, LedgerError> {
        for chain in self.all() {
            if let Some(block) = chain.get_block(hash)? {
                return Ok(Some(block));
            }
        }
        Ok(None)
    }

    /// Union lookup of a block with its transactions across all chains.
    pub fn find_block_with_transactions(
        &self,
        hash: &BlockHash,
    ) -> Result<Option<Block>, LedgerError> {
        for chain in self.all() {
            if let Some(block) = chain.get_block_with_transactions(hash)? {
                return Ok(Some(block));
            }
        }
        Ok(None)
    }

    /// Union lookup of one transaction across all chains.
    pub fn find_transaction(
        &self,
        block_hash: &BlockHash,
        id: &TxId,
    ) -> Result<Option<Transaction>, LedgerError> {
        for chain in self.all() {
            if let Some(tx) = chain.get_transaction(block_hash, id)? {
                return Ok(Some(tx));
            }
        }
        Ok(None)
    }
}
