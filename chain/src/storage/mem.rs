//! In-memory chain store for tests and small simulations.
//!
//! Mirrors the on-disk layout: transaction rows live in an ordered map
//! keyed by `block_hash || '_' || tx_id` so prefix scans return the same key
//! order as the persistent backend. A single `RwLock` over the whole state
//! makes every [`ChainStore::put_block`] trivially atomic.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::ledger::store::{
    ChainStore, META_HEIGHT, META_TIP, META_TOTAL_TXS, StorageError, transaction_key,
    transaction_prefix,
};
use crate::types::{Account, Block, BlockHash, DocumentMapping, Transaction, TxId};

#[derive(Default)]
struct Inner {
    blocks: HashMap<BlockHash, Vec<u8>>,
    transactions: BTreeMap<Vec<u8>, Vec<u8>>,
    accounts: BTreeMap<String, Vec<u8>>,
    mappings: BTreeMap<String, Vec<u8>>,
    meta: HashMap<Vec<u8>, Vec<u8>>,
}

/// Heap-backed [`ChainStore`] with no durability.
#[derive(Default)]
pub struct MemChainStore {
    inner: RwLock<Inner>,
}

impl MemChainStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn parse_ascii_u64(bytes: &[u8], what: &'static str) -> Result<u64, StorageError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(StorageError::CorruptedMeta(what))
}

impl ChainStore for MemChainStore {
    fn put_block(&self, block: &Block, is_tip: bool) -> Result<(), StorageError> {
        let mut inner = self.inner.write().expect("store lock poisoned");

        let current_total = match inner.meta.get(META_TOTAL_TXS) {
            Some(bytes) => parse_ascii_u64(bytes, "total transaction count")?,
            None => 0,
        };

        inner.blocks.insert(block.hash, block.encode_header());
        for tx in &block.transactions {
            inner
                .transactions
                .insert(transaction_key(&block.hash, &tx.id), tx.encode());
        }
        if is_tip {
            inner
                .meta
                .insert(META_TIP.to_vec(), block.hash.as_bytes().to_vec());
            inner
                .meta
                .insert(META_HEIGHT.to_vec(), block.height.to_string().into_bytes());
        }
        inner.meta.insert(
            META_TOTAL_TXS.to_vec(),
            (current_total + block.total_transactions)
                .to_string()
                .into_bytes(),
        );

        Ok(())
    }

    fn get_block(&self, hash: &BlockHash) -> Result<Option<Block>, StorageError> {
        let inner = self.inner.read().expect("store lock poisoned");
        match inner.blocks.get(hash) {
            Some(bytes) => Block::decode_header(bytes)
                .map(Some)
                .ok_or_else(|| StorageError::Codec("undecodable block header".to_string())),
            None => Ok(None),
        }
    }

    fn transactions_in(&self, block_hash: &BlockHash) -> Result<Vec<Transaction>, StorageError> {
        let inner = self.inner.read().expect("store lock poisoned");
        let prefix = transaction_prefix(block_hash);
        let mut out = Vec::new();
        for (key, bytes) in inner.transactions.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            let tx = Transaction::decode(bytes)
                .ok_or_else(|| StorageError::Codec("undecodable transaction".to_string()))?;
            out.push(tx);
        }
        Ok(out)
    }

    fn get_transaction(
        &self,
        block_hash: &BlockHash,
        id: &TxId,
    ) -> Result<Option<Transaction>, StorageError> {
        let inner = self.inner.read().expect("store lock poisoned");
        match inner.transactions.get(&transaction_key(block_hash, id)) {
            Some(bytes) => Transaction::decode(bytes)
                .map(Some)
                .ok_or_else(|| StorageError::Codec("undecodable transaction".to_string())),
            None => Ok(None),
        }
    }

    fn tip(&self) -> Result<Option<BlockHash>, StorageError> {
        let inner = self.inner.read().expect("store lock poisoned");
        match inner.meta.get(META_TIP) {
            Some(bytes) => {
                let hash = crate::types::Hash256::from_slice(bytes)
                    .ok_or(StorageError::CorruptedMeta("tip hash length"))?;
                Ok(Some(BlockHash(hash)))
            }
            None => Ok(None),
        }
    }

    fn height(&self) -> Result<Option<u64>, StorageError> {
        let inner = self.inner.read().expect("store lock poisoned");
        match inner.meta.get(META_HEIGHT) {
            Some(bytes) => parse_ascii_u64(bytes, "tip height").map(Some),
            None => Ok(None),
        }
    }

    fn total_transactions(&self) -> Result<u64, StorageError> {
        let inner = self.inner.read().expect("store lock poisoned");
        match inner.meta.get(META_TOTAL_TXS) {
            Some(bytes) => parse_ascii_u64(bytes, "total transaction count"),
            None => Ok(0),
        }
    }

    fn put_account(&self, address: &str, account: &Account) -> Result<(), StorageError> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        inner.accounts.insert(address.to_string(), account.encode());
        Ok(())
    }

    fn get_account(&self, address: &str) -> Result<Option<Account>, StorageError> {
        let inner = self.inner.read().expect("store lock poisoned");
        match inner.accounts.get(address) {
            Some(bytes) => Account::decode(bytes)
                .map(Some)
                .ok_or_else(|| StorageError::Codec("undecodable account".to_string())),
            None => Ok(None),
        }
    }

    fn accounts(&self) -> Result<Vec<(String, Account)>, StorageError> {
        let inner = self.inner.read().expect("store lock poisoned");
        let mut out = Vec::with_capacity(inner.accounts.len());
        for (address, bytes) in &inner.accounts {
            let account = Account::decode(bytes)
                .ok_or_else(|| StorageError::Codec("undecodable account".to_string()))?;
            out.push((address.clone(), account));
        }
        Ok(out)
    }

    fn put_mapping(&self, mapping: &DocumentMapping) -> Result<(), StorageError> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        inner
            .mappings
            .insert(mapping.collection.clone(), mapping.encode());
        Ok(())
    }

    fn get_mapping(&self, collection: &str) -> Result<Option<DocumentMapping>, StorageError> {
        let inner = self.inner.read().expect("store lock poisoned");
        match inner.mappings.get(collection) {
            Some(bytes) => DocumentMapping::decode(bytes)
                .map(Some)
                .ok_or_else(|| StorageError::Codec("undecodable mapping".to_string())),
            None => Ok(None),
        }
    }

    fn mappings(&self) -> Result<Vec<DocumentMapping>, StorageError> {
        let inner = self.inner.read().expect("store lock poisoned");
        let mut out = Vec::with_capacity(inner.mappings.len());
        for bytes in inner.mappings.values() {
            let mapping = DocumentMapping::decode(bytes)
                .ok_or_else(|| StorageError::Codec("undecodable mapping".to_string()))?;
            out.push(mapping);
        }
        Ok(out)
    }

    fn get_meta(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let inner = self.inner.read().expect("store lock poisoned");
        Ok(inner.meta.get(key).cloned())
    }

    fn put_meta(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        inner.meta.insert(key.to_vec(), value.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HASH_LEN, PeerId};

    fn tx() -> Transaction {
        Transaction::new(
            PeerId([2u8; HASH_LEN]),
            b"{}".to_vec(),
            "notes",
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
    }

    #[test]
    fn block_and_transactions_roundtrip() {
        let store = MemChainStore::new();
        let block = Block::new(vec![tx(), tx()], None, 0).unwrap();
        store.put_block(&block, true).unwrap();

        let header = store.get_block(&block.hash).unwrap().unwrap();
        assert_eq!(header.hash, block.hash);
        assert!(header.transactions.is_empty());

        let rows = store.transactions_in(&block.hash).unwrap();
        assert_eq!(rows.len(), 2);
        for tx in &block.transactions {
            let found = store.get_transaction(&block.hash, &tx.id).unwrap().unwrap();
            assert_eq!(&found, tx);
        }
    }

    #[test]
    fn tip_and_totals_track_appends() {
        let store = MemChainStore::new();
        let b0 = Block::new(vec![tx()], None, 0).unwrap();
        store.put_block(&b0, true).unwrap();
        let b1 = Block::new(vec![tx(), tx(), tx()], Some(b0.hash), 1).unwrap();
        store.put_block(&b1, true).unwrap();

        assert_eq!(store.tip().unwrap(), Some(b1.hash));
        assert_eq!(store.height().unwrap(), Some(1));
        assert_eq!(store.total_transactions().unwrap(), 4);
    }

    #[test]
    fn non_tip_write_leaves_tip_alone() {
        let store = MemChainStore::new();
        let b0 = Block::new(vec![tx()], None, 0).unwrap();
        store.put_block(&b0, true).unwrap();
        let ancestor = Block::new(vec![tx()], None, 7).unwrap();
        store.put_block(&ancestor, false).unwrap();

        assert_eq!(store.tip().unwrap(), Some(b0.hash));
        assert_eq!(store.height().unwrap(), Some(0));
        assert_eq!(store.total_transactions().unwrap(), 2);
    }

    #[test]
    fn accounts_and_mappings_roundtrip() {
        let store = MemChainStore::new();
        let account = Account {
            public_key: "04ab".to_string(),
            ..Account::default()
        };
        store.put_account("0xabc", &account).unwrap();
        assert_eq!(store.get_account("0xabc").unwrap(), Some(account));
        assert_eq!(store.accounts().unwrap().len(), 1);

        let mapping = DocumentMapping::default_collection();
        store.put_mapping(&mapping).unwrap();
        assert_eq!(store.get_mapping("default").unwrap(), Some(mapping));
        assert!(store.get_mapping("missing").unwrap().is_none());
    }

    #[test]
    fn meta_roundtrip() {
        let store = MemChainStore::new();
        assert!(store.get_meta(b"p2pPrivKey").unwrap().is_none());
        store.put_meta(b"p2pPrivKey", &[1, 2, 3]).unwrap();
        assert_eq!(store.get_meta(b"p2pPrivKey").unwrap(), Some(vec![1, 2, 3]));
    }
}
