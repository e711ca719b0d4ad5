use thiserror::Error;

use crate::pageid::{PageId, WalPointer};
use crate::tx::TransactionId;

/// All failure modes the core can surface, grouped by the error kinds named
/// in the specification. Retryable kinds (`LockConflict`, `TxTimeout`) are
/// absorbed by the transaction coordinator with backoff; `TxDeadlock` is
/// terminal for the losing transaction but retryable for the client;
/// storage/WAL errors are surfaced fatally when they affect durability.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage error at page {page:?} offset {offset}: {reason}")]
    Storage {
        page: PageId,
        offset: u64,
        reason: String,
    },

    #[error("wal error at {pointer:?}: {reason}")]
    Wal {
        pointer: WalPointer,
        reason: String,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("partition state error: {0}")]
    PartitionState(String),

    #[error("lock conflict on key {key:?} held by {holder:?}")]
    LockConflict { holder: TransactionId, key: Vec<u8> },

    #[error("transaction {0:?} timed out")]
    TxTimeout(TransactionId),

    #[error("transaction {0:?} aborted to break a deadlock")]
    TxDeadlock(TransactionId),

    #[error("transaction {0:?} exhausted its remap budget and was rolled back")]
    TxRemapExhausted(TransactionId),

    #[error("no node owns partition for the requested topology version")]
    AffinityUnavailable,

    #[error("internal assertion failed: {0}")]
    Internal(String),
}

impl GridError {
    /// Whether the coordinator should retry the operation that produced
    /// this error, rather than surface it to the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GridError::LockConflict { .. } | GridError::TxTimeout(_))
    }

    pub fn storage(page: PageId, offset: u64, reason: impl Into<String>) -> Self {
        GridError::Storage {
            page,
            offset,
            reason: reason.into(),
        }
    }

    pub fn wal(pointer: WalPointer, reason: impl Into<String>) -> Self {
        GridError::Wal {
            pointer,
            reason: reason.into(),
        }
    }
}

pub type GridResult<T> = Result<T, GridError>;
