//! Verification of blocks received from peers.
//!
//! A block crossing the trust boundary must prove two things before it is
//! persisted into a replica chain: the recorded hash recomputes from its
//! own header fields and merkle root, and every transaction that carries a
//! signature verifies against its public key. A single failure rejects the
//! whole block.

use std::fmt;

use crate::crypto::{keccak256, verify_signature};
use crate::types::Block;

/// Why an incoming block was rejected.
#[derive(Debug)]
pub enum BlockError {
    /// The recorded hash does not recompute from the block's fields.
    HashMismatch,
    /// `total_transactions` disagrees with the transaction payload.
    CountMismatch { declared: u64, actual: u64 },
    /// A signed transaction failed signature verification.
    InvalidTransactionSignature { tx_id: String },
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockError::HashMismatch => {
                write!(f, "block hash does not match its recomputed value")
            }
            BlockError::CountMismatch { declared, actual } => write!(
                f,
                "block declares {declared} transactions but carries {actual}"
            ),
            BlockError::InvalidTransactionSignature { tx_id } => {
                write!(f, "invalid signature on transaction {tx_id}")
            }
        }
    }
}

impl std::error::Error for BlockError {}

/// Verifies an incoming block: recomputed hash, transaction count, and the
/// signature of every signed transaction.
pub fn verify_block(block: &Block) -> Result<(), BlockError> {
    let actual = block.transactions.len() as u64;
    if block.total_transactions != actual {
        return Err(BlockError::CountMismatch {
            declared: block.total_transactions,
            actual,
        });
    }

    if !block.verify_hash() {
        return Err(BlockError::HashMismatch);
    }

    for tx in &block.transactions {
        if !tx.is_signed() {
            continue;
        }
        let digest = keccak256(&tx.raw_data);
        if !verify_signature(&tx.pub_key, &digest, &tx.signature) {
            return Err(BlockError::InvalidTransactionSignature {
                tx_id: tx.id.to_hex(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::UserKeypair;
    use crate::types::{HASH_LEN, PeerId, Transaction};

    fn peer() -> PeerId {
        PeerId([8u8; HASH_LEN])
    }

    fn signed_tx(keypair: &UserKeypair, raw: &[u8]) -> Transaction {
        let digest = keccak256(raw);
        Transaction::new(
            peer(),
            raw.to_vec(),
            "notes",
            keypair.public_key_bytes().to_vec(),
            keypair.sign_digest(&digest).to_vec(),
            Vec::new(),
        )
    }

    #[test]
    fn well_formed_block_verifies() {
        let keypair = UserKeypair::generate();
        let txs = vec![
            signed_tx(&keypair, br#"{"a":1}"#),
            Transaction::new(peer(), b"{}".to_vec(), "notes", vec![], vec![], vec![]),
        ];
        let block = Block::new(txs, None, 0).unwrap();
        assert!(verify_block(&block).is_ok());
    }

    #[test]
    fn tampered_hash_is_rejected() {
        let mut block =
            Block::new(
                vec![Transaction::new(
                    peer(),
                    b"{}".to_vec(),
                    "notes",
                    vec![],
                    vec![],
                    vec![],
                )],
                None,
                0,
            )
            .unwrap();
        block.hash.0.0[0] ^= 0xFF;
        match verify_block(&block) {
            Err(BlockError::HashMismatch) => {}
            other => panic!("expected HashMismatch, got {other:?}"),
        }
    }

    #[test]
    fn forged_signature_rejects_the_whole_block() {
        let keypair = UserKeypair::generate();
        let mut tx = signed_tx(&keypair, br#"{"a":1}"#);
        // Swap the document after signing.
        tx.raw_data = br#"{"a":2}"#.to_vec();
        let block = Block::new(vec![tx], None, 0).unwrap();
        match verify_block(&block) {
            Err(BlockError::InvalidTransactionSignature { .. }) => {}
            other => panic!("expected InvalidTransactionSignature, got {other:?}"),
        }
    }

    #[test]
    fn count_mismatch_is_rejected() {
        let mut block =
            Block::new(
                vec![Transaction::new(
                    peer(),
                    b"{}".to_vec(),
                    "notes",
                    vec![],
                    vec![],
                    vec![],
                )],
                None,
                0,
            )
            .unwrap();
        block.total_transactions = 5;
        match verify_block(&block) {
            Err(BlockError::CountMismatch { declared: 5, actual: 1 }) => {}
            other => panic!("expected CountMismatch, got {other:?}"),
        }
    }
}
