//! RocksDB-backed chain store.
//!
//! One RocksDB database per chain, with dedicated column families for the
//! four namespaces:
//!
//! - `"blocks"`: `hash -> header_bytes` plus the well-known meta keys,
//! - `"transactions"`: `block_hash || '_' || tx_id -> tx_bytes`,
//! - `"accounts"`: `address -> account_bytes`,
//! - `"collections"`: `name -> mapping_bytes`.
//!
//! [`ChainStore::put_block`] assembles a single `WriteBatch` covering the
//! header, every transaction row and the meta updates, so a crash mid-append
//! leaves no partial state behind.

use std::path::Path;

use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options,
    WriteBatch};

use crate::ledger::store::{
    ChainStore, META_HEIGHT, META_TIP, META_TOTAL_TXS, StorageError, transaction_key,
    transaction_prefix,
};
use crate::types::{Account, Block, BlockHash, DocumentMapping, Hash256, Transaction, TxId};

const CF_BLOCKS: &str = "blocks";
const CF_TRANSACTIONS: &str = "transactions";
const CF_ACCOUNTS: &str = "accounts";
const CF_COLLECTIONS: &str = "collections";

/// Whether a chain database already exists at `path`.
pub fn db_exists(path: &Path) -> bool {
    path.exists()
}

/// RocksDB-backed implementation of [`ChainStore`].
pub struct RocksDbChainStore {
    db: DB,
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}

impl RocksDbChainStore {
    /// Opens (or creates) a chain database at the given path.
    ///
    /// All column families are created up front; the `"default"` family is
    /// kept around but unused.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new("default", Options::default()),
            ColumnFamilyDescriptor::new(CF_BLOCKS, Options::default()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Options::default()),
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Options::default()),
            ColumnFamilyDescriptor::new(CF_COLLECTIONS, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;
        Ok(Self { db })
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or(StorageError::MissingColumnFamily(name))
    }

    fn get_ascii_u64(
        &self,
        key: &[u8],
        what: &'static str,
    ) -> Result<Option<u64>, StorageError> {
        let cf = self.cf(CF_BLOCKS)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => {
                let value = std::str::from_utf8(&bytes)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or(StorageError::CorruptedMeta(what))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

impl ChainStore for RocksDbChainStore {
    fn put_block(&self, block: &Block, is_tip: bool) -> Result<(), StorageError> {
        let cf_blocks = self.cf(CF_BLOCKS)?;
        let cf_txs = self.cf(CF_TRANSACTIONS)?;

        let current_total = self
            .get_ascii_u64(META_TOTAL_TXS, "total transaction count")?
            .unwrap_or(0);

        // One batch for header, transactions and meta: the append is an
        // all-or-nothing unit.
        let mut batch = WriteBatch::default();
        batch.put_cf(cf_blocks, block.hash.as_bytes(), block.encode_header());
        for tx in &block.transactions {
            batch.put_cf(cf_txs, transaction_key(&block.hash, &tx.id), tx.encode());
        }
        if is_tip {
            batch.put_cf(cf_blocks, META_TIP, block.hash.as_bytes());
            batch.put_cf(cf_blocks, META_HEIGHT, block.height.to_string());
        }
        batch.put_cf(
            cf_blocks,
            META_TOTAL_TXS,
            (current_total + block.total_transactions).to_string(),
        );

        self.db.write(batch)?;
        Ok(())
    }

    fn get_block(&self, hash: &BlockHash) -> Result<Option<Block>, StorageError> {
        let cf = self.cf(CF_BLOCKS)?;
        match self.db.get_cf(cf, hash.as_bytes())? {
            Some(bytes) => Block::decode_header(&bytes)
                .map(Some)
                .ok_or_else(|| StorageError::Codec("undecodable block header".to_string())),
            None => Ok(None),
        }
    }

    fn transactions_in(&self, block_hash: &BlockHash) -> Result<Vec<Transaction>, StorageError> {
        let cf = self.cf(CF_TRANSACTIONS)?;
        let prefix = transaction_prefix(block_hash);

        let mut out = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));
        for entry in iter {
            let (key, bytes) = entry?;
            if !key.starts_with(&prefix) {
                break;
            }
            let tx = Transaction::decode(&bytes)
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
        let cf = self.cf(CF_TRANSACTIONS)?;
        match self.db.get_cf(cf, transaction_key(block_hash, id))? {
            Some(bytes) => Transaction::decode(&bytes)
                .map(Some)
                .ok_or_else(|| StorageError::Codec("undecodable transaction".to_string())),
            None => Ok(None),
        }
    }

    fn tip(&self) -> Result<Option<BlockHash>, StorageError> {
        let cf = self.cf(CF_BLOCKS)?;
        match self.db.get_cf(cf, META_TIP)? {
            Some(bytes) => {
                let hash = Hash256::from_slice(&bytes)
                    .ok_or(StorageError::CorruptedMeta("tip hash length"))?;
                Ok(Some(BlockHash(hash)))
            }
            None => Ok(None),
        }
    }

    fn height(&self) -> Result<Option<u64>, StorageError> {
        self.get_ascii_u64(META_HEIGHT, "tip height")
    }

    fn total_transactions(&self) -> Result<u64, StorageError> {
        Ok(self
            .get_ascii_u64(META_TOTAL_TXS, "total transaction count")?
            .unwrap_or(0))
    }

    fn put_account(&self, address: &str, account: &Account) -> Result<(), StorageError> {
        let cf = self.cf(CF_ACCOUNTS)?;
        self.db.put_cf(cf, address.as_bytes(), account.encode())?;
        Ok(())
    }

    fn get_account(&self, address: &str) -> Result<Option<Account>, StorageError> {
        let cf = self.cf(CF_ACCOUNTS)?;
        match self.db.get_cf(cf, address.as_bytes())? {
            Some(bytes) => Account::decode(&bytes)
                .map(Some)
                .ok_or_else(|| StorageError::Codec("undecodable account".to_string())),
            None => Ok(None),
        }
    }

    fn accounts(&self) -> Result<Vec<(String, Account)>, StorageError> {
        let cf = self.cf(CF_ACCOUNTS)?;
        let mut out = Vec::new();
        for entry in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, bytes) = entry?;
            let address = String::from_utf8(key.to_vec())
                .map_err(|_| StorageError::Codec("non-utf8 account address".to_string()))?;
            let account = Account::decode(&bytes)
                .ok_or_else(|| StorageError::Codec("undecodable account".to_string()))?;
            out.push((address, account));
        }
        Ok(out)
    }

    fn put_mapping(&self, mapping: &DocumentMapping) -> Result<(), StorageError> {
        let cf = self.cf(CF_COLLECTIONS)?;
        self.db
            .put_cf(cf, mapping.collection.as_bytes(), mapping.encode())?;
        Ok(())
    }

    fn get_mapping(&self, collection: &str) -> Result<Option<DocumentMapping>, StorageError> {
        let cf = self.cf(CF_COLLECTIONS)?;
        match self.db.get_cf(cf, collection.as_bytes())? {
            Some(bytes) => DocumentMapping::decode(&bytes)
                .map(Some)
                .ok_or_else(|| StorageError::Codec("undecodable mapping".to_string())),
            None => Ok(None),
        }
    }

    fn mappings(&self) -> Result<Vec<DocumentMapping>, StorageError> {
        let cf = self.cf(CF_COLLECTIONS)?;
        let mut out = Vec::new();
        for entry in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, bytes) = entry?;
            let mapping = DocumentMapping::decode(&bytes)
                .ok_or_else(|| StorageError::Codec("undecodable mapping".to_string()))?;
            out.push(mapping);
        }
        Ok(out)
    }

    fn get_meta(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let cf = self.cf(CF_BLOCKS)?;
        Ok(self.db.get_cf(cf, key)?)
    }

    fn put_meta(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let cf = self.cf(CF_BLOCKS)?;
        self.db.put_cf(cf, key, value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HASH_LEN, PeerId};
    use tempfile::TempDir;

    fn tx() -> Transaction {
        Transaction::new(
            PeerId([3u8; HASH_LEN]),
            b"{\"k\":true}".to_vec(),
            "notes",
            Vec::new(),
            Vec::new(),
            Vec::new(),
        )
    }

    #[test]
    fn block_transactions_and_meta_roundtrip() {
        let tmp = TempDir::new().expect("create temp dir");
        let store = RocksDbChainStore::open(tmp.path()).expect("open RocksDB");

        let b0 = Block::new(vec![tx(), tx()], None, 0).unwrap();
        store.put_block(&b0, true).unwrap();
        let b1 = Block::new(vec![tx()], Some(b0.hash), 1).unwrap();
        store.put_block(&b1, true).unwrap();

        assert_eq!(store.tip().unwrap(), Some(b1.hash));
        assert_eq!(store.height().unwrap(), Some(1));
        assert_eq!(store.total_transactions().unwrap(), 3);

        let header = store.get_block(&b0.hash).unwrap().unwrap();
        assert_eq!(header.total_transactions, 2);
        assert!(header.transactions.is_empty());

        let rows = store.transactions_in(&b0.hash).unwrap();
        assert_eq!(rows.len(), 2);
        for tx in &b0.transactions {
            assert_eq!(
                store.get_transaction(&b0.hash, &tx.id).unwrap().as_ref(),
                Some(tx)
            );
        }
        // The other block's rows are not picked up by the prefix scan.
        assert_eq!(store.transactions_in(&b1.hash).unwrap().len(), 1);
    }

    #[test]
    fn state_survives_reopen() {
        let tmp = TempDir::new().expect("create temp dir");
        let block = Block::new(vec![tx()], None, 0).unwrap();

        {
            let store = RocksDbChainStore::open(tmp.path()).unwrap();
            store.put_block(&block, true).unwrap();
            store.put_meta(b"p2pPrivKey", &[7u8; 32]).unwrap();
        }

        let store = RocksDbChainStore::open(tmp.path()).unwrap();
        assert_eq!(store.tip().unwrap(), Some(block.hash));
        assert_eq!(store.total_transactions().unwrap(), 1);
        assert_eq!(store.get_meta(b"p2pPrivKey").unwrap(), Some(vec![7u8; 32]));
    }

    #[test]
    fn accounts_and_mappings_roundtrip() {
        let tmp = TempDir::new().expect("create temp dir");
        let store = RocksDbChainStore::open(tmp.path()).unwrap();

        let account = Account {
            public_key: format!("04{}", "cd".repeat(64)),
            ..Account::default()
        };
        store.put_account("0xdef", &account).unwrap();
        assert_eq!(store.get_account("0xdef").unwrap(), Some(account));
        assert_eq!(store.accounts().unwrap().len(), 1);

        let mapping = DocumentMapping::default_collection();
        store.put_mapping(&mapping).unwrap();
        assert_eq!(store.mappings().unwrap(), vec![mapping]);
    }

    #[test]
    fn absent_rows_read_as_none() {
        let tmp = TempDir::new().expect("create temp dir");
        let store = RocksDbChainStore::open(tmp.path()).unwrap();

        assert!(store.tip().unwrap().is_none());
        assert!(store.height().unwrap().is_none());
        assert_eq!(store.total_transactions().unwrap(), 0);
        assert!(
            store
                .get_block(&BlockHash(Hash256([1u8; HASH_LEN])))
                .unwrap()
                .is_none()
        );
        assert!(store.get_account("0xmissing").unwrap().is_none());
    }
}
