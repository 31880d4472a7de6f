//! Transaction admission and pooling.
//!
//! Two admission paths exist: [`Receiver::put`] for signed submissions
//! (signature gate, then schema gate) and [`Receiver::put_unsigned`] for
//! bulk imports, which skips the signature and leaves the document
//! unverifiable. Accepted transactions enter a FIFO queue shared with the
//! block-cutting scheduler; a transaction is either rejected synchronously
//! or accepted; nothing fails after enqueue.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::crypto::{keccak256, public_key_to_address, verify_signature};
use crate::ledger::{SharedStore, StorageError};
use crate::types::{PeerId, Transaction, TxId};
use crate::validation::document::{DocumentError, validate_document};

/// Tuning knobs of the admission pipeline and block cut.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Block fill cap: a block is cut as soon as this many transactions
    /// are queued.
    pub max_txs_per_block: usize,
    /// Block interval: a non-empty queue is drained into a block at this
    /// cadence even when the cap was not reached.
    pub max_block_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_txs_per_block: 2048,
            max_block_interval_ms: 2000,
        }
    }
}

/// Synchronous verdict of an admission attempt.
#[derive(Debug, PartialEq)]
pub enum PutOutcome {
    /// The signature did not verify; nothing was queued.
    InvalidSignature,
    /// The document violated its collection schema; nothing was queued.
    FieldErrors(BTreeMap<String, String>),
    /// Queued under the returned transaction id.
    Accepted(TxId),
}

/// Admission failures that are not per-field schema verdicts.
#[derive(Debug)]
pub enum AdmissionError {
    /// The target collection has no schema.
    UnknownCollection(String),
    /// The payload was not a JSON object.
    MalformedDocument(String),
    /// Underlying storage failure while loading the schema.
    Storage(StorageError),
}

impl From<StorageError> for AdmissionError {
    fn from(e: StorageError) -> Self {
        AdmissionError::Storage(e)
    }
}

impl From<DocumentError> for AdmissionError {
    fn from(e: DocumentError) -> Self {
        match e {
            DocumentError::MalformedJson(msg) => AdmissionError::MalformedDocument(msg),
        }
    }
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionError::UnknownCollection(_) => write!(f, "collection does not exist"),
            AdmissionError::MalformedDocument(msg) => write!(f, "malformed document: {msg}"),
            AdmissionError::Storage(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for AdmissionError {}

/// The front door for incoming transactions.
///
/// Producers (HTTP handlers) run in parallel; the queue is guarded by a
/// mutex and consumed by the single scheduler task.
pub struct Receiver {
    queue: Mutex<VecDeque<Transaction>>,
    store: SharedStore,
    peer_id: PeerId,
    config: PoolConfig,
    /// Pinged whenever the queue reaches the fill cap, so the scheduler
    /// can cut early instead of waiting for its timer.
    full: Notify,
}

impl Receiver {
    pub fn new(store: SharedStore, peer_id: PeerId, config: PoolConfig) -> Self {
        Receiver {
            queue: Mutex::new(VecDeque::new()),
            store,
            peer_id,
            config,
            full: Notify::new(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Admits a signed document into `collection`.
    ///
    /// Checks run in order: signature over `Keccak256(raw_data)`, then
    /// schema. The submitter's own address (derived from `pub_key`) is
    /// appended to the permitted addresses when absent, so read access is
    /// preserved regardless of the transport in front of this call.
    pub fn put(
        &self,
        raw_data: &[u8],
        collection: &str,
        pub_key: &[u8],
        signature: &[u8],
        mut permitted_addresses: Vec<String>,
    ) -> Result<PutOutcome, AdmissionError> {
        let digest = keccak256(raw_data);
        if !verify_signature(pub_key, &digest, signature) {
            return Ok(PutOutcome::InvalidSignature);
        }

        let field_errors = self.check_mapping(raw_data, collection)?;
        if !field_errors.is_empty() {
            return Ok(PutOutcome::FieldErrors(field_errors));
        }

        if let Ok(address) = public_key_to_address(pub_key) {
            let already_permitted = permitted_addresses
                .iter()
                .any(|a| a.eq_ignore_ascii_case(&address));
            if !already_permitted {
                permitted_addresses.push(address);
            }
        }

        let tx = Transaction::new(
            self.peer_id,
            raw_data.to_vec(),
            collection,
            pub_key.to_vec(),
            signature.to_vec(),
            permitted_addresses,
        );
        Ok(PutOutcome::Accepted(self.enqueue(tx)))
    }

    /// Admits a document without signature evidence.
    ///
    /// Used by bulk import; the produced transaction is structurally valid
    /// but unverifiable.
    pub fn put_unsigned(
        &self,
        raw_data: &[u8],
        collection: &str,
        permitted_addresses: Vec<String>,
    ) -> Result<PutOutcome, AdmissionError> {
        let field_errors = self.check_mapping(raw_data, collection)?;
        if !field_errors.is_empty() {
            return Ok(PutOutcome::FieldErrors(field_errors));
        }

        let tx = Transaction::new(
            self.peer_id,
            raw_data.to_vec(),
            collection,
            Vec::new(),
            Vec::new(),
            permitted_addresses,
        );
        Ok(PutOutcome::Accepted(self.enqueue(tx)))
    }

    fn check_mapping(
        &self,
        raw_data: &[u8],
        collection: &str,
    ) -> Result<BTreeMap<String, String>, AdmissionError> {
        let mapping = self
            .store
            .get_mapping(collection)?
            .ok_or_else(|| AdmissionError::UnknownCollection(collection.to_string()))?;
        Ok(validate_document(&mapping, raw_data)?)
    }

    fn enqueue(&self, tx: Transaction) -> TxId {
        let id = tx.id;
        let len = {
            let mut queue = self.queue.lock().expect("pool queue lock poisoned");
            queue.push_back(tx);
            queue.len()
        };
        if len >= self.config.max_txs_per_block {
            self.full.notify_one();
        }
        id
    }

    /// Removes and returns up to `max` transactions in FIFO order.
    pub fn drain(&self, max: usize) -> Vec<Transaction> {
        let mut queue = self.queue.lock().expect("pool queue lock poisoned");
        let take = max.min(queue.len());
        queue.drain(..take).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().expect("pool queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves when the queue has reached the fill cap.
    pub(crate) async fn full_notified(&self) {
        self.full.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::UserKeypair;
    use crate::ledger::store::ChainStore;
    use crate::storage::MemChainStore;
    use crate::types::{DocumentMapping, FieldDef, FieldType, HASH_LEN};
    use std::sync::Arc;

    fn receiver_with_schema() -> (Receiver, UserKeypair) {
        let store = Arc::new(MemChainStore::new());

        let mut fields = BTreeMap::new();
        fields.insert(
            "age".to_string(),
            FieldDef {
                field_type: FieldType::Number,
            },
        );
        fields.insert(
            "ts".to_string(),
            FieldDef {
                field_type: FieldType::Datetime,
            },
        );
        store
            .put_mapping(&DocumentMapping {
                collection: "people".to_string(),
                fields,
            })
            .unwrap();

        let receiver = Receiver::new(store, PeerId([6u8; HASH_LEN]), PoolConfig::default());
        (receiver, UserKeypair::generate())
    }

    fn signed(keypair: &UserKeypair, raw: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let digest = keccak256(raw);
        (
            keypair.public_key_bytes().to_vec(),
            keypair.sign_digest(&digest).to_vec(),
        )
    }

    #[test]
    fn invalid_signature_is_rejected_without_queueing() {
        let (receiver, keypair) = receiver_with_schema();
        let raw = br#"{"age":30}"#;
        let (pub_key, mut signature) = signed(&keypair, raw);
        signature[0] ^= 0xFF;

        let outcome = receiver
            .put(raw, "people", &pub_key, &signature, Vec::new())
            .unwrap();
        assert_eq!(outcome, PutOutcome::InvalidSignature);
        assert!(receiver.is_empty());
    }

    #[test]
    fn schema_violation_returns_field_errors() {
        let (receiver, keypair) = receiver_with_schema();
        let raw = br#"{"age":"thirty"}"#;
        let (pub_key, signature) = signed(&keypair, raw);

        match receiver
            .put(raw, "people", &pub_key, &signature, Vec::new())
            .unwrap()
        {
            PutOutcome::FieldErrors(errors) => {
                assert_eq!(errors["age"], "field type should be number");
            }
            other => panic!("expected FieldErrors, got {other:?}"),
        }
        assert!(receiver.is_empty());
    }

    #[test]
    fn valid_datetime_document_is_accepted() {
        let (receiver, keypair) = receiver_with_schema();
        let raw = br#"{"ts":"2020-01-02T03:04:05Z"}"#;
        let (pub_key, signature) = signed(&keypair, raw);

        match receiver
            .put(raw, "people", &pub_key, &signature, Vec::new())
            .unwrap()
        {
            PutOutcome::Accepted(_) => {}
            other => panic!("expected Accepted, got {other:?}"),
        }
        assert_eq!(receiver.len(), 1);
    }

    #[test]
    fn unknown_collection_is_an_error() {
        let (receiver, keypair) = receiver_with_schema();
        let raw = br#"{"age":30}"#;
        let (pub_key, signature) = signed(&keypair, raw);

        match receiver.put(raw, "ghost", &pub_key, &signature, Vec::new()) {
            Err(AdmissionError::UnknownCollection(name)) => assert_eq!(name, "ghost"),
            other => panic!("expected UnknownCollection, got {other:?}"),
        }
    }

    #[test]
    fn submitter_address_is_appended_to_permitted() {
        let (receiver, keypair) = receiver_with_schema();
        let raw = br#"{"age":30}"#;
        let (pub_key, signature) = signed(&keypair, raw);

        receiver
            .put(
                raw,
                "people",
                &pub_key,
                &signature,
                vec!["0x1111111111111111111111111111111111111111".to_string()],
            )
            .unwrap();

        let queued = receiver.drain(10);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].permitted_addresses.len(), 2);
        assert!(queued[0].permitted_addresses.contains(&keypair.address()));
    }

    #[test]
    fn submitter_address_is_not_duplicated() {
        let (receiver, keypair) = receiver_with_schema();
        let raw = br#"{"age":30}"#;
        let (pub_key, signature) = signed(&keypair, raw);

        receiver
            .put(raw, "people", &pub_key, &signature, vec![keypair.address()])
            .unwrap();

        let queued = receiver.drain(10);
        assert_eq!(queued[0].permitted_addresses, vec![keypair.address()]);
    }

    #[test]
    fn unsigned_path_skips_the_signature_gate() {
        let (receiver, _) = receiver_with_schema();
        match receiver
            .put_unsigned(br#"{"age":30}"#, "people", Vec::new())
            .unwrap()
        {
            PutOutcome::Accepted(_) => {}
            other => panic!("expected Accepted, got {other:?}"),
        }

        let queued = receiver.drain(10);
        assert!(!queued[0].is_signed());
        assert!(queued[0].permitted_addresses.is_empty());
    }

    #[test]
    fn drain_preserves_fifo_order() {
        let (receiver, _) = receiver_with_schema();
        let mut ids = Vec::new();
        for age in 0..5 {
            let raw = format!(r#"{{"age":{age}}}"#);
            match receiver
                .put_unsigned(raw.as_bytes(), "people", Vec::new())
                .unwrap()
            {
                PutOutcome::Accepted(id) => ids.push(id),
                other => panic!("expected Accepted, got {other:?}"),
            }
        }

        let first = receiver.drain(3);
        let rest = receiver.drain(10);
        let drained: Vec<TxId> = first.iter().chain(rest.iter()).map(|tx| tx.id).collect();
        assert_eq!(drained, ids);
        assert!(receiver.is_empty());
    }
}
