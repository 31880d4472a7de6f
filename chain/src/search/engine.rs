//! The pluggable per-collection index consumed by the search adapter.
//!
//! The adapter only relies on the small [`CollectionIndex`] contract:
//! batch indexing and query execution. The bundled implementation,
//! [`MemoryIndex`], keeps documents in an ordered in-memory map and
//! evaluates the query tree by scanning; it is rebuilt at startup by
//! re-indexing the stored chains, so it needs no on-disk format of its
//! own.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::RwLock;

use serde_json::Value;

use crate::search::query::Query;

/// Failures of the search subsystem.
#[derive(Debug)]
pub enum SearchError {
    /// Query referenced a collection without an index.
    UnknownCollection(String),
    /// A collection with this name already exists.
    DuplicateCollection(String),
    /// Schema declared a field in the reserved `_` namespace.
    ReservedField(String),
    /// Schema payload was structurally unusable.
    InvalidMapping(String),
    /// Underlying ledger storage failure.
    Storage(crate::ledger::StorageError),
    /// Filesystem failure while managing collection directories.
    Io(String),
}

impl From<crate::ledger::StorageError> for SearchError {
    fn from(e: crate::ledger::StorageError) -> Self {
        SearchError::Storage(e)
    }
}

impl fmt::Display for SearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchError::UnknownCollection(name) => write!(f, "no such collection: {name}"),
            SearchError::DuplicateCollection(name) => {
                write!(f, "the collection {name} already exists")
            }
            SearchError::ReservedField(name) => {
                write!(f, "field name: {name} cannot start with _")
            }
            SearchError::InvalidMapping(msg) => {
                write!(f, "not a valid collection schema definition: {msg}")
            }
            SearchError::Storage(e) => write!(f, "{e}"),
            SearchError::Io(msg) => write!(f, "collection index io error: {msg}"),
        }
    }
}

impl std::error::Error for SearchError {}

/// Result page of a query: the total match count and the requested slice
/// of document keys, in indexing order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchHits {
    pub total: u64,
    pub keys: Vec<String>,
}

/// The index interface consumed per collection.
pub trait CollectionIndex: Send + Sync {
    /// Indexes a batch of `(doc_key, document)` pairs. Re-indexing an
    /// existing key replaces the stored document.
    fn index_batch(
        &self,
        docs: Vec<(String, serde_json::Map<String, Value>)>,
    ) -> Result<(), SearchError>;

    /// Evaluates `query`, returning `size` keys starting at `from`.
    fn search(&self, query: &Query, from: usize, size: usize) -> Result<SearchHits, SearchError>;

    /// Number of indexed documents.
    fn doc_count(&self) -> usize;
}

/// Scan-based in-memory index.
#[derive(Default)]
pub struct MemoryIndex {
    docs: RwLock<BTreeMap<String, serde_json::Map<String, Value>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CollectionIndex for MemoryIndex {
    fn index_batch(
        &self,
        docs: Vec<(String, serde_json::Map<String, Value>)>,
    ) -> Result<(), SearchError> {
        let mut guard = self.docs.write().expect("index lock poisoned");
        for (key, doc) in docs {
            guard.insert(key, doc);
        }
        Ok(())
    }

    fn search(&self, query: &Query, from: usize, size: usize) -> Result<SearchHits, SearchError> {
        let guard = self.docs.read().expect("index lock poisoned");
        let mut total = 0u64;
        let mut keys = Vec::new();
        for (key, doc) in guard.iter() {
            if !query.matches(doc) {
                continue;
            }
            if total as usize >= from && keys.len() < size {
                keys.push(key.clone());
            }
            total += 1;
        }
        Ok(SearchHits { total, keys })
    }

    fn doc_count(&self) -> usize {
        self.docs.read().expect("index lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(json: &str) -> serde_json::Map<String, Value> {
        match serde_json::from_str(json).unwrap() {
            Value::Object(map) => map,
            _ => panic!("test doc must be an object"),
        }
    }

    #[test]
    fn index_and_search() {
        let index = MemoryIndex::new();
        index
            .index_batch(vec![
                ("k1".to_string(), doc(r#"{"city": "Montreal"}"#)),
                ("k2".to_string(), doc(r#"{"city": "Burlington"}"#)),
                ("k3".to_string(), doc(r#"{"city": "montreal east"}"#)),
            ])
            .unwrap();

        let hits = index
            .search(
                &Query::Match {
                    value: "montreal".to_string(),
                    field: Some("city".to_string()),
                },
                0,
                10,
            )
            .unwrap();
        assert_eq!(hits.total, 2);
        assert_eq!(hits.keys, vec!["k1".to_string(), "k3".to_string()]);
    }

    #[test]
    fn paging_applies_after_filtering() {
        let index = MemoryIndex::new();
        let batch = (0..7)
            .map(|i| (format!("k{i}"), doc(r#"{"kind": "page"}"#)))
            .collect();
        index.index_batch(batch).unwrap();

        let page = index
            .search(
                &Query::Match {
                    value: "page".to_string(),
                    field: Some("kind".to_string()),
                },
                2,
                3,
            )
            .unwrap();
        assert_eq!(page.total, 7);
        assert_eq!(
            page.keys,
            vec!["k2".to_string(), "k3".to_string(), "k4".to_string()]
        );
    }

    #[test]
    fn reindexing_a_key_replaces_the_document() {
        let index = MemoryIndex::new();
        index
            .index_batch(vec![("k".to_string(), doc(r#"{"v": "old"}"#))])
            .unwrap();
        index
            .index_batch(vec![("k".to_string(), doc(r#"{"v": "new"}"#))])
            .unwrap();

        assert_eq!(index.doc_count(), 1);
        let hits = index
            .search(
                &Query::Match {
                    value: "old".to_string(),
                    field: Some("v".to_string()),
                },
                0,
                10,
            )
            .unwrap();
        assert_eq!(hits.total, 0);
    }
}
