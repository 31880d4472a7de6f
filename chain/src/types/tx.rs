//! Transaction record: one admitted document submission.
//!
//! A transaction is created by the admission pool, becomes immutable once
//! placed in a block, and is only ever destroyed together with the whole
//! database. Serialization uses **bincode 2** with the `serde` integration
//! and an explicit `standard()` config; the same canonical encoding is used
//! for storage and for the wire.

use serde::{Deserialize, Serialize};

use crate::crypto::sha256;
use crate::types::{BlockHash, PeerId, TxId};

/// Fixed synthetic document carried by the genesis coinbase transaction.
pub const GENESIS_DOCUMENT: &str = r#"{"isActive":true,"balance":"$2,412.00","picture":"http://placehold.it/32x32","age":41,"eyeColor":"green","name":"Nadia Calloway","gender":"female","organization":"LEDGERWORKS","email":"nadiacalloway@ledgerworks.example","phone":"+1 (802) 664-3127","address":"118 Harkness Avenue, Brandermill, Vermont, 2174","about":"Amet cupidatat occaecat ullamco consequat sit consectetur elit nulla laborum irure proident. Duis excepteur velit in pariatur anim nostrud do sint qui veniam officia.","registered":"2019-06-03T11:22:41 +04:00","latitude":44.260059,"longitude":-72.575386,"tags":["aliqua","minim","veniam","laboris","cupidatat","duis","esse"],"friends":[{"id":0,"name":"Marisol Whitaker"},{"id":1,"name":"Edmund Pratt"},{"id":2,"name":"Lena Osei"}],"greeting":"Hello, Nadia Calloway! You have 7 unread messages.","favoriteFruit":"plum"}"#;

/// One document submission, with the signature evidence needed to verify
/// its origin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Server-assigned identifier: `SHA256(uuid_v4_bytes)`.
    pub id: TxId,

    /// Hash of the containing block; `None` while the transaction is still
    /// pooled.
    pub block_hash: Option<BlockHash>,

    /// Identity of the node that admitted this transaction.
    pub peer_id: PeerId,

    /// The submitted UTF-8 JSON document, opaque to the ledger.
    pub raw_data: Vec<u8>,

    /// Admission wall-clock time, milliseconds since Unix epoch.
    pub accepted_timestamp_ms: i64,

    /// Collection the document was submitted to.
    pub collection: String,

    /// 65-byte uncompressed secp256k1 public key of the submitter; empty
    /// for unsigned bulk imports.
    pub pub_key: Vec<u8>,

    /// Signature over `Keccak256(raw_data)`; 64 or 65 bytes, empty for
    /// unsigned bulk imports.
    pub signature: Vec<u8>,

    /// Addresses permitted to read this document. The admission pool
    /// guarantees the submitter's own address is present for signed
    /// submissions.
    pub permitted_addresses: Vec<String>,
}

impl Transaction {
    /// Creates a pooled transaction with a fresh random id and the current
    /// admission timestamp.
    pub fn new(
        peer_id: PeerId,
        raw_data: Vec<u8>,
        collection: impl Into<String>,
        pub_key: Vec<u8>,
        signature: Vec<u8>,
        permitted_addresses: Vec<String>,
    ) -> Self {
        let id = TxId(sha256(uuid::Uuid::new_v4().as_bytes()));
        Transaction {
            id,
            block_hash: None,
            peer_id,
            raw_data,
            accepted_timestamp_ms: chrono::Utc::now().timestamp_millis(),
            collection: collection.into(),
            pub_key,
            signature,
            permitted_addresses,
        }
    }

    /// The coinbase transaction of a fresh local chain: a fixed synthetic
    /// document in the default collection, unsigned, tagged with this
    /// node's peer id.
    pub fn coinbase(peer_id: PeerId) -> Self {
        Transaction::new(
            peer_id,
            GENESIS_DOCUMENT.as_bytes().to_vec(),
            super::COLLECTION_DEFAULT,
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
    }

    /// Whether this transaction carries signature evidence at all.
    ///
    /// Unsigned bulk imports are structurally valid but unverifiable.
    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    /// Canonical bincode-2 encoding.
    ///
    /// # Panics
    ///
    /// Panics if encoding fails, which would be a programming error: all
    /// fields are plain data.
    pub fn encode(&self) -> Vec<u8> {
        let cfg = bincode::config::standard();
        bincode::serde::encode_to_vec(self, cfg)
            .expect("Transaction should always be serializable with bincode 2 + serde")
    }

    /// Decodes a transaction from its canonical encoding.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let cfg = bincode::config::standard();
        let (tx, _): (Transaction, usize) = bincode::serde::decode_from_slice(bytes, cfg).ok()?;
        Some(tx)
    }
}
