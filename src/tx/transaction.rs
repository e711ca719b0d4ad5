//! The transaction handle itself. Grounded on the teacher's
//! `transaction/tx.rs` (`Transaction`, monotonic id counter, status enum),
//! generalized from a single implicit pessimistic/read-committed mode to
//! the spec's explicit concurrency/isolation matrix (§3, §4.H).

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::pageid::WalPointer;

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// Monotonically increasing transaction identifier, unique per node per
/// process lifetime. Unlike `GridCacheVersion` this never needs to be
/// compared across nodes: it only identifies locks and WAL markers locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn next() -> Self {
        TransactionId(NEXT_TX_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxConcurrency {
    Pessimistic,
    Optimistic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Preparing,
    Prepared,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
}

/// A single transaction's working state: the keys it has touched, the
/// isolation/concurrency mode it was opened with, and (for optimistic
/// transactions) the topology version it started against, used to decide
/// whether a remap is needed at prepare time (§4.H edge case).
#[derive(Debug)]
pub struct Transaction {
    pub id: TransactionId,
    pub concurrency: TxConcurrency,
    pub isolation: IsolationLevel,
    pub state: TxState,
    pub started_at: Instant,
    pub timeout_ms: u64,
    pub started_topology_version: u64,
    pub write_set: HashSet<Vec<u8>>,
    pub read_set: HashSet<Vec<u8>>,
    pub start_marker: Option<WalPointer>,
}

impl Transaction {
    pub fn new(
        concurrency: TxConcurrency,
        isolation: IsolationLevel,
        timeout_ms: u64,
        topology_version: u64,
    ) -> Self {
        Self {
            id: TransactionId::next(),
            concurrency,
            isolation,
            state: TxState::Active,
            started_at: Instant::now(),
            timeout_ms,
            started_topology_version: topology_version,
            write_set: HashSet::new(),
            read_set: HashSet::new(),
            start_marker: None,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    pub fn is_timed_out(&self) -> bool {
        self.elapsed_ms() > self.timeout_ms
    }

    pub fn record_write(&mut self, key: &[u8]) {
        self.write_set.insert(key.to_vec());
    }

    pub fn record_read(&mut self, key: &[u8]) {
        self.read_set.insert(key.to_vec());
    }
}
