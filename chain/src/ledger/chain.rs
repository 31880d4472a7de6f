//! The ledger engine: one chain over one store.
//!
//! A `Blockchain` wraps a [`ChainStore`] with the append logic. The local
//! chain is created once with a genesis block and only ever extended by
//! the block-cutting scheduler, which makes it the sole writer to the
//! `blocks` and `transactions` namespaces. Peer replica chains reuse the
//! same type but are fed through [`Blockchain::persist_block`] by the
//! replication handler.

use crate::ledger::error::LedgerError;
use crate::ledger::store::SharedStore;
use crate::types::{Block, BlockHash, PeerId, Transaction, TxId};

/// A sequence of blocks linked by `prev_block_hash`, backed by one store.
pub struct Blockchain {
    store: SharedStore,
    peer_id: PeerId,
}

impl std::fmt::Debug for Blockchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blockchain")
            .field("peer_id", &self.peer_id)
            .finish()
    }
}

impl Blockchain {
    /// Creates a fresh local chain with a genesis block.
    ///
    /// Fails with [`LedgerError::ChainExists`], without touching the
    /// store, when a tip is already present.
    pub fn create(store: SharedStore, peer_id: PeerId) -> Result<Self, LedgerError> {
        if store.tip()?.is_some() {
            return Err(LedgerError::ChainExists);
        }

        let coinbase = Transaction::coinbase(peer_id);
        let genesis = Block::new(vec![coinbase], None, 0).expect("genesis carries one transaction");
        store.put_block(&genesis, true)?;

        Ok(Blockchain { store, peer_id })
    }

    /// Opens an existing chain; fails when the store holds none.
    pub fn open(store: SharedStore, peer_id: PeerId) -> Result<Self, LedgerError> {
        if store.tip()?.is_none() {
            return Err(LedgerError::NoChain);
        }
        Ok(Blockchain { store, peer_id })
    }

    /// Wraps a store as a replica of `peer_id`'s chain.
    ///
    /// Replicas start empty and are backfilled tip-first, so no tip is
    /// required yet.
    pub fn replica(store: SharedStore, peer_id: PeerId) -> Self {
        Blockchain { store, peer_id }
    }

    /// The peer owning this chain: the local node for the local chain, the
    /// remote node for a replica.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Cuts a new block over `transactions` on top of the current tip and
    /// persists it atomically. Local chain only.
    pub fn add_block(&self, transactions: Vec<Transaction>) -> Result<Block, LedgerError> {
        if transactions.is_empty() {
            return Err(LedgerError::EmptyBlock);
        }

        let tip = self.store.tip()?.ok_or(LedgerError::NoChain)?;
        let height = self.store.height()?.ok_or(LedgerError::NoChain)?;

        let block = Block::new(transactions, Some(tip), height + 1)
            .expect("non-empty transaction list always forms a block");
        self.store.put_block(&block, true)?;

        Ok(block)
    }

    /// Persists a block received from the owning peer. `is_tip` decides
    /// whether the replica's tip and height move; backfilled ancestors
    /// only accumulate the transaction count.
    pub fn persist_block(&self, block: &Block, is_tip: bool) -> Result<(), LedgerError> {
        self.store.put_block(block, is_tip)?;
        Ok(())
    }

    pub fn tip(&self) -> Result<Option<BlockHash>, LedgerError> {
        Ok(self.store.tip()?)
    }

    pub fn height(&self) -> Result<Option<u64>, LedgerError> {
        Ok(self.store.height()?)
    }

    pub fn total_transactions(&self) -> Result<u64, LedgerError> {
        Ok(self.store.total_transactions()?)
    }

    /// Loads a block header by hash.
    pub fn get_block(&self, hash: &BlockHash) -> Result<Option<Block>, LedgerError> {
        Ok(self.store.get_block(hash)?)
    }

    /// Loads a block header together with its transactions.
    pub fn get_block_with_transactions(
        &self,
        hash: &BlockHash,
    ) -> Result<Option<Block>, LedgerError> {
        let Some(mut block) = self.store.get_block(hash)? else {
            return Ok(None);
        };
        block.transactions = self.store.transactions_in(hash)?;
        Ok(Some(block))
    }

    pub fn transactions_in(&self, hash: &BlockHash) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.store.transactions_in(hash)?)
    }

    pub fn get_transaction(
        &self,
        block_hash: &BlockHash,
        id: &TxId,
    ) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.store.get_transaction(block_hash, id)?)
    }

    /// The tip block with its transactions loaded.
    pub fn tip_block(&self) -> Result<Option<Block>, LedgerError> {
        let Some(tip) = self.store.tip()? else {
            return Ok(None);
        };
        let block = self
            .get_block_with_transactions(&tip)?
            .ok_or(LedgerError::BrokenTip)?;
        Ok(Some(block))
    }
}
