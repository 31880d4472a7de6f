//! Search adapter: one index per collection, shared across all chains.
//!
//! The adapter owns the collection registry (schemas live in the local
//! store's `collections` namespace, indices in memory), augments indexed
//! documents with the reserved system fields, serializes batch submission
//! behind an internal lock, and rewrites queries for per-document ACLs.
//!
//! Indices are rebuilt at startup by re-indexing the stored chains, which
//! is also the crash-recovery path: a block that was persisted but never
//! indexed is picked up by the next boot's rescan.

pub mod engine;
pub mod query;

pub use engine::{CollectionIndex, MemoryIndex, SearchError, SearchHits};
pub use query::{Query, SearchRequest};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::SecondsFormat;
use serde_json::Value;

use crate::ledger::{Blockchain, SharedStore};
use crate::types::{Block, DocumentMapping, PeerId};

/// Named indices with search engine features, one per user collection.
pub struct Search {
    store: SharedStore,
    index_dir_root: PathBuf,
    indices: Mutex<HashMap<String, Arc<dyn CollectionIndex>>>,
    // Serializes whole-block batch submission from the local scheduler and
    // the peer replication handler.
    batch_lock: Mutex<()>,
}

impl Search {
    /// Opens the adapter over the local chain's store: loads all persisted
    /// collection schemas, creating the `default` collection on first run.
    pub fn new(store: SharedStore, data_dir: &std::path::Path) -> Result<Self, SearchError> {
        let index_dir_root = data_dir.join("collections");
        std::fs::create_dir_all(&index_dir_root).map_err(|e| SearchError::Io(e.to_string()))?;

        let search = Search {
            store,
            index_dir_root,
            indices: Mutex::new(HashMap::new()),
            batch_lock: Mutex::new(()),
        };

        let persisted = search.store.mappings()?;
        if persisted.is_empty() {
            tracing::info!("no collections found, creating the default collection");
            search.create_mapping(DocumentMapping::default_collection())?;
        } else {
            tracing::info!(count = persisted.len(), "opening existing collections");
            let mut indices = search.indices.lock().expect("index map lock poisoned");
            for mapping in persisted {
                indices.insert(
                    mapping.collection.clone(),
                    Arc::new(MemoryIndex::new()) as Arc<dyn CollectionIndex>,
                );
            }
        }

        Ok(search)
    }

    /// Registers a new collection: validates the schema, persists it in
    /// the `collections` namespace, materializes the collection directory
    /// and the in-memory index.
    pub fn create_mapping(&self, mapping: DocumentMapping) -> Result<(), SearchError> {
        if mapping.collection.is_empty() || !mapping.collection.is_ascii() {
            return Err(SearchError::InvalidMapping(
                "collection name must be non-empty ASCII".to_string(),
            ));
        }
        for field in mapping.fields.keys() {
            if field.starts_with('_') {
                return Err(SearchError::ReservedField(field.clone()));
            }
        }

        let mut indices = self.indices.lock().expect("index map lock poisoned");
        if indices.contains_key(&mapping.collection) {
            return Err(SearchError::DuplicateCollection(mapping.collection));
        }

        self.store.put_mapping(&mapping)?;

        let dir = self.index_dir_root.join(&mapping.collection);
        std::fs::create_dir_all(&dir).map_err(|e| SearchError::Io(e.to_string()))?;
        let schema_path = dir.join("schema.json");
        let schema_json = serde_json::to_vec_pretty(&mapping)
            .map_err(|e| SearchError::InvalidMapping(e.to_string()))?;
        std::fs::write(schema_path, schema_json).map_err(|e| SearchError::Io(e.to_string()))?;

        indices.insert(
            mapping.collection.clone(),
            Arc::new(MemoryIndex::new()) as Arc<dyn CollectionIndex>,
        );
        Ok(())
    }

    /// Accepts a schema pushed by a peer. Existing collections are left
    /// untouched; returns whether the mapping was new.
    pub fn register_remote_mapping(&self, mapping: DocumentMapping) -> Result<bool, SearchError> {
        if self.has_collection(&mapping.collection) {
            return Ok(false);
        }
        match self.create_mapping(mapping) {
            Ok(()) => Ok(true),
            // Lost a race against a concurrent local creation.
            Err(SearchError::DuplicateCollection(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.indices
            .lock()
            .expect("index map lock poisoned")
            .contains_key(name)
    }

    /// Names of all registered collections.
    pub fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .indices
            .lock()
            .expect("index map lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// The persisted schema of one collection.
    pub fn mapping(&self, name: &str) -> Result<Option<DocumentMapping>, SearchError> {
        Ok(self.store.get_mapping(name)?)
    }

    fn index_of(&self, name: &str) -> Option<Arc<dyn CollectionIndex>> {
        self.indices
            .lock()
            .expect("index map lock poisoned")
            .get(name)
            .cloned()
    }

    /// Indexes every transaction of a block, grouped into per-collection
    /// batches. Transactions whose collection has no index are skipped;
    /// they stay retrievable by id through the ledger.
    pub fn index_block(&self, block: &Block, peer_id: &PeerId) -> Result<usize, SearchError> {
        let _guard = self.batch_lock.lock().expect("batch lock poisoned");

        let mut batches: HashMap<String, Vec<(String, serde_json::Map<String, Value>)>> =
            HashMap::new();
        let mut indexed = 0usize;

        for tx in &block.transactions {
            let Some(_) = self.index_of(&tx.collection) else {
                continue;
            };

            let parsed: Value = match serde_json::from_slice(&tx.raw_data) {
                Ok(value) => value,
                Err(e) => {
                    tracing::error!(tx = %tx.id.to_hex(), error = %e, "error indexing transaction");
                    continue;
                }
            };
            let Value::Object(mut doc) = parsed else {
                tracing::error!(tx = %tx.id.to_hex(), "transaction payload is not a JSON object");
                continue;
            };

            let timestamp = chrono::DateTime::from_timestamp_millis(tx.accepted_timestamp_ms)
                .unwrap_or(chrono::DateTime::UNIX_EPOCH)
                .to_rfc3339_opts(SecondsFormat::Secs, true);

            doc.insert("_type".into(), tx.collection.clone().into());
            doc.insert("_blockId".into(), block.hash.to_hex().into());
            doc.insert("_timestamp".into(), timestamp.into());
            doc.insert("_publicKey".into(), hex::encode(&tx.pub_key).into());
            doc.insert("_id".into(), tx.id.to_hex().into());
            doc.insert("_peerId".into(), peer_id.to_hex().into());
            doc.insert(
                "_permittedAddresses".into(),
                tx.permitted_addresses.clone().into(),
            );

            let key = format!("{}_{}", block.hash.to_hex(), tx.id.to_hex());
            batches.entry(tx.collection.clone()).or_default().push((key, doc));
            indexed += 1;
        }

        for (collection, batch) in batches {
            if let Some(index) = self.index_of(&collection) {
                index.index_batch(batch)?;
            }
        }

        Ok(indexed)
    }

    /// Runs a query against one collection. Unless the caller holds the
    /// read override for it, the query is restricted to documents whose
    /// `_permittedAddresses` matches the caller.
    pub fn query(
        &self,
        collection: &str,
        request: SearchRequest,
        caller_address: &str,
        has_read_override: bool,
    ) -> Result<SearchHits, SearchError> {
        let index = self
            .index_of(collection)
            .ok_or_else(|| SearchError::UnknownCollection(collection.to_string()))?;

        let query = if has_read_override {
            request.query
        } else {
            request.query.restricted_to(caller_address)
        };

        index.search(&query, request.from, request.size)
    }

    /// Rebuilds the indices from one chain by walking it back from the
    /// tip. Returns the number of indexed transactions.
    pub fn reindex_chain(&self, chain: &Blockchain) -> Result<usize, SearchError> {
        let mut indexed = 0usize;
        let mut cursor = chain
            .tip()
            .map_err(|e| SearchError::Io(e.to_string()))?;
        while let Some(hash) = cursor {
            let Some(block) = chain
                .get_block_with_transactions(&hash)
                .map_err(|e| SearchError::Io(e.to_string()))?
            else {
                break;
            };
            indexed += self.index_block(&block, chain.peer_id())?;
            cursor = block.prev_block_hash;
        }
        Ok(indexed)
    }
}
