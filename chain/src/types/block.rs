//! Block record and canonical hashing.
//!
//! A block bundles an ordered sequence of transactions with the linking
//! header. The hash commits to the previous block, the merkle root over
//! the transaction ids, and the timestamp:
//!
//! `hash = SHA256(prev_block_hash || merkle_root || be64(timestamp))`
//!
//! where `prev_block_hash` contributes no bytes for the genesis block.
//! Headers are encoded **without** their transactions; transactions are
//! persisted separately under `block_hash || '_' || tx_id` keys so a block
//! header can be loaded without its payload.

use serde::{Deserialize, Serialize};

use crate::crypto::sha256;
use crate::merkle::MerkleTree;
use crate::types::{BlockHash, Hash256, Transaction};

/// A header plus an ordered sequence of transactions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Wall-clock creation time, seconds since Unix epoch.
    pub timestamp: i64,

    /// Hash of the previous block; `None` for genesis.
    pub prev_block_hash: Option<BlockHash>,

    /// Height on the owning chain; genesis is 0.
    pub height: u64,

    /// This block's own hash.
    pub hash: BlockHash,

    /// Number of transactions committed by this block.
    pub total_transactions: u64,

    /// The transactions, in admission order. Empty when only the header
    /// was loaded from storage.
    pub transactions: Vec<Transaction>,
}

/// The part of a block the hash commits to and storage serializes.
#[derive(Serialize, Deserialize)]
struct HeaderRecord {
    timestamp: i64,
    prev_block_hash: Option<BlockHash>,
    height: u64,
    hash: BlockHash,
    total_transactions: u64,
}

impl Block {
    /// Assembles and hashes a new block over `transactions`, which must be
    /// non-empty. Each transaction is stamped with the resulting block
    /// hash.
    pub fn new(
        mut transactions: Vec<Transaction>,
        prev_block_hash: Option<BlockHash>,
        height: u64,
    ) -> Option<Block> {
        let timestamp = chrono::Utc::now().timestamp();
        let merkle_root = merkle_root_of(&transactions)?;
        let hash = Block::compute_hash(prev_block_hash.as_ref(), &merkle_root, timestamp);

        for tx in &mut transactions {
            tx.block_hash = Some(hash);
        }

        Some(Block {
            timestamp,
            prev_block_hash,
            height,
            hash,
            total_transactions: transactions.len() as u64,
            transactions,
        })
    }

    /// The chaining digest over header fields and the merkle root.
    pub fn compute_hash(
        prev_block_hash: Option<&BlockHash>,
        merkle_root: &Hash256,
        timestamp: i64,
    ) -> BlockHash {
        let mut data = Vec::with_capacity(72);
        if let Some(prev) = prev_block_hash {
            data.extend_from_slice(prev.as_bytes());
        }
        data.extend_from_slice(merkle_root.as_bytes());
        data.extend_from_slice(&timestamp.to_be_bytes());
        BlockHash(sha256(&data))
    }

    /// Merkle tree over this block's transaction ids.
    pub fn merkle_tree(&self) -> Option<MerkleTree> {
        let leaves: Vec<Hash256> = self.transactions.iter().map(|tx| tx.id.0).collect();
        MerkleTree::build(&leaves)
    }

    /// Recomputes the hash from the stored fields and compares it against
    /// the recorded one. Requires the transactions to be loaded.
    pub fn verify_hash(&self) -> bool {
        let Some(root) = merkle_root_of(&self.transactions) else {
            return false;
        };
        Block::compute_hash(self.prev_block_hash.as_ref(), &root, self.timestamp) == self.hash
    }

    /// Canonical bincode-2 encoding of the header (no transactions).
    ///
    /// # Panics
    ///
    /// Panics if encoding fails, which would be a programming error: all
    /// fields are plain data.
    pub fn encode_header(&self) -> Vec<u8> {
        let record = HeaderRecord {
            timestamp: self.timestamp,
            prev_block_hash: self.prev_block_hash,
            height: self.height,
            hash: self.hash,
            total_transactions: self.total_transactions,
        };
        let cfg = bincode::config::standard();
        bincode::serde::encode_to_vec(&record, cfg)
            .expect("Block header should always be serializable with bincode 2 + serde")
    }

    /// Decodes a header into a block with no transactions loaded.
    pub fn decode_header(bytes: &[u8]) -> Option<Block> {
        let cfg = bincode::config::standard();
        let (record, _): (HeaderRecord, usize) =
            bincode::serde::decode_from_slice(bytes, cfg).ok()?;
        Some(Block {
            timestamp: record.timestamp,
            prev_block_hash: record.prev_block_hash,
            height: record.height,
            hash: record.hash,
            total_transactions: record.total_transactions,
            transactions: Vec::new(),
        })
    }
}

fn merkle_root_of(transactions: &[Transaction]) -> Option<Hash256> {
    let leaves: Vec<Hash256> = transactions.iter().map(|tx| tx.id.0).collect();
    MerkleTree::build(&leaves).map(|tree| tree.root())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HASH_LEN, PeerId};

    fn dummy_tx() -> Transaction {
        Transaction::new(
            PeerId([1u8; HASH_LEN]),
            b"{\"n\":1}".to_vec(),
            "notes",
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
    }

    #[test]
    fn hash_recomputes_from_stored_fields() {
        let block = Block::new(vec![dummy_tx(), dummy_tx()], None, 0).unwrap();

        let root = block.merkle_tree().unwrap().root();
        let recomputed = Block::compute_hash(None, &root, block.timestamp);
        assert_eq!(recomputed, block.hash);
        assert!(block.verify_hash());
    }

    #[test]
    fn hash_covers_prev_link_and_timestamp() {
        let parent = Block::new(vec![dummy_tx()], None, 0).unwrap();
        let child = Block::new(vec![dummy_tx()], Some(parent.hash), 1).unwrap();

        let root = child.merkle_tree().unwrap().root();
        assert_ne!(
            Block::compute_hash(None, &root, child.timestamp),
            child.hash
        );
        assert_ne!(
            Block::compute_hash(Some(&parent.hash), &root, child.timestamp + 1),
            child.hash
        );
    }

    #[test]
    fn transactions_are_stamped_with_the_block_hash() {
        let block = Block::new(vec![dummy_tx(), dummy_tx(), dummy_tx()], None, 0).unwrap();
        assert_eq!(block.total_transactions, 3);
        for tx in &block.transactions {
            assert_eq!(tx.block_hash, Some(block.hash));
        }
    }

    #[test]
    fn empty_transaction_list_builds_no_block() {
        assert!(Block::new(Vec::new(), None, 0).is_none());
    }

    #[test]
    fn header_roundtrip_drops_transactions() {
        let block = Block::new(vec![dummy_tx()], None, 0).unwrap();
        let decoded = Block::decode_header(&block.encode_header()).unwrap();

        assert_eq!(decoded.hash, block.hash);
        assert_eq!(decoded.height, block.height);
        assert_eq!(decoded.timestamp, block.timestamp);
        assert_eq!(decoded.prev_block_hash, block.prev_block_hash);
        assert_eq!(decoded.total_transactions, 1);
        assert!(decoded.transactions.is_empty());
    }

    #[test]
    fn tampered_block_fails_hash_verification() {
        let mut block = Block::new(vec![dummy_tx()], None, 0).unwrap();
        block.timestamp += 1;
        assert!(!block.verify_hash());
    }
}
