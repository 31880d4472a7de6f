use std::fmt;

use crate::ledger::store::StorageError;

/// High-level errors of the ledger engine.
#[derive(Debug)]
pub enum LedgerError {
    /// A chain already exists where a new one was to be created.
    ChainExists,
    /// The store holds no chain yet (no tip).
    NoChain,
    /// A block must contain at least one transaction.
    EmptyBlock,
    /// The tip block referenced by metadata is missing.
    BrokenTip,
    /// Underlying storage failure.
    Storage(StorageError),
}

impl From<StorageError> for LedgerError {
    fn from(e: StorageError) -> Self {
        LedgerError::Storage(e)
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::ChainExists => write!(f, "chain already exists"),
            LedgerError::NoChain => write!(f, "no existing chain found, create one first"),
            LedgerError::EmptyBlock => write!(f, "a block requires at least one transaction"),
            LedgerError::BrokenTip => write!(f, "tip metadata points at a missing block"),
            LedgerError::Storage(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for LedgerError {}
