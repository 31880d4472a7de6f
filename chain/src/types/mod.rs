//! Core domain types used by the ledger.
//!
//! This module defines strongly-typed hashes and identifiers shared across
//! the whole crate, plus the block, transaction, account and collection
//! mapping records built on top of them. The goal is to avoid "naked" byte
//! buffers in public APIs and instead use domain-specific newtypes.

use serde::{Deserialize, Serialize};

pub mod account;
pub mod block;
pub mod mapping;
pub mod tx;

pub use account::{Account, ROLE_ADMIN, ROLE_USER, Role};
pub use block::Block;
pub use mapping::{COLLECTION_DEFAULT, DocumentMapping, FieldDef, FieldType, RESERVED_FIELDS};
pub use tx::Transaction;

/// Length in bytes of all 256-bit hash types used in this module.
pub const HASH_LEN: usize = 32;

/// Strongly-typed 256-bit hash wrapper.
///
/// Backing representation for block hashes, transaction ids and merkle
/// digests. It is always exactly [`HASH_LEN`] bytes long; the digest
/// algorithm (SHA-256 or Keccak-256) is chosen by the producing code in
/// [`crate::crypto`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash256(pub [u8; HASH_LEN]);

impl Hash256 {
    /// Returns the underlying 32-byte hash as a borrowed array.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Renders the hash as 64 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a hash from 64 hex characters.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        Self::from_slice(&bytes)
    }

    /// Copies a hash out of an arbitrary byte slice, if it has the right
    /// length.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != HASH_LEN {
            return None;
        }
        let mut arr = [0u8; HASH_LEN];
        arr.copy_from_slice(bytes);
        Some(Hash256(arr))
    }
}

/// Hash identifying a block: `SHA256(prev || merkle_root || be64(timestamp))`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockHash(pub Hash256);

impl BlockHash {
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        self.0.as_bytes()
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        Hash256::from_hex(s).map(BlockHash)
    }
}

/// Transaction identifier: `SHA256(uuid_v4_bytes)`, assigned at admission.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(pub Hash256);

impl TxId {
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        self.0.as_bytes()
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        Hash256::from_hex(s).map(TxId)
    }
}

/// Durable node identity: the public half of the node's long-lived ed25519
/// keypair, generated at first boot and persisted with the local chain.
///
/// Peer ids tag transactions with the node that admitted them and key the
/// per-peer replica chains on disk.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub [u8; HASH_LEN]);

impl PeerId {
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        Hash256::from_hex(s).map(|h| PeerId(h.0))
    }

    /// XOR distance to another peer id, as used by the discovery table.
    pub fn distance(&self, other: &PeerId) -> [u8; HASH_LEN] {
        let mut out = [0u8; HASH_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        out
    }
}

/// Checks that a user address is `0x` followed by 40 hex characters.
///
/// Case is not significant; addresses are rendered lowercase but accepted
/// in any casing.
pub fn is_valid_address(address: &str) -> bool {
    let Some(rest) = address.strip_prefix("0x") else {
        return false;
    };
    rest.len() == 40 && rest.chars().all(|c| c.is_ascii_hexdigit())
}
