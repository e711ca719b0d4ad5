//! Transaction coordinator: begin/prepare/commit/rollback. Grounded on the
//! teacher's `transaction/tx.rs` `commit`/`abort` (write WAL marker, then
//! release locks, then flip transaction status), generalized to the
//! spec's two-phase pessimistic protocol, one-phase commit fusion for
//! single-partition writes, and optimistic remap-on-topology-change
//! (§4.H).

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{GridError, GridResult};
use crate::tx::backoff::BackoffPolicy;
use crate::tx::lock_manager::{LockManager, LockMode};
use crate::tx::transaction::{IsolationLevel, Transaction, TransactionId, TxConcurrency, TxState};
use crate::wal::manager::WalManager;
use crate::wal::record::{TxMarkerKind, WalRecord};

/// Bounds how many times an optimistic transaction may re-map its write set
/// onto a moving topology before the commit fails outright (§4.H: "a
/// bounded retry count bounds re-mapping; budget exhaustion fails the tx").
pub const MAX_REMAP_ATTEMPTS: u32 = 5;

pub struct TxCoordinator {
    locks: LockManager,
    active: Mutex<HashMap<TransactionId, Transaction>>,
    backoff: BackoffPolicy,
}

impl TxCoordinator {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self {
            locks: LockManager::new(),
            active: Mutex::new(HashMap::new()),
            backoff,
        }
    }

    pub fn begin(
        &self,
        concurrency: TxConcurrency,
        isolation: IsolationLevel,
        timeout_ms: u64,
        topology_version: u64,
        wal: &WalManager,
    ) -> GridResult<TransactionId> {
        let mut tx = Transaction::new(concurrency, isolation, timeout_ms, topology_version);
        let ptr = wal.log(&WalRecord::TxMarker {
            tx_id: tx.id,
            marker: TxMarkerKind::Start,
        })?;
        tx.start_marker = Some(ptr);
        let id = tx.id;
        self.active.lock().unwrap().insert(id, tx);
        Ok(id)
    }

    /// Acquires a lock for `tx` on `key`, retrying with exponential backoff
    /// until granted, the transaction's own timeout elapses, or the lock
    /// manager reports this transaction as the deadlock victim.
    pub fn lock_key(&self, tx: TransactionId, key: &[u8], mode: LockMode) -> GridResult<()> {
        let mut attempt = 0u32;
        loop {
            if self.locks.try_acquire(tx, key, mode)? {
                let mut guard = self.active.lock().unwrap();
                if let Some(t) = guard.get_mut(&tx) {
                    match mode {
                        LockMode::Exclusive => t.record_write(key),
                        LockMode::Shared => t.record_read(key),
                    }
                }
                return Ok(());
            }

            let elapsed = {
                let guard = self.active.lock().unwrap();
                guard.get(&tx).map(|t| t.elapsed_ms()).unwrap_or(0)
            };
            if {
                let guard = self.active.lock().unwrap();
                guard.get(&tx).map(|t| t.is_timed_out()).unwrap_or(true)
            } {
                return Err(GridError::TxTimeout(tx));
            }

            match self.backoff.wait_for(attempt, elapsed) {
                Some(wait_ms) => {
                    std::thread::sleep(std::time::Duration::from_millis(wait_ms));
                    attempt += 1;
                }
                None => return Err(GridError::TxTimeout(tx)),
            }
        }
    }

    /// Whether an optimistic transaction's write set needs to be remapped
    /// because the topology moved since it began (§4.H edge case: commit
    /// must fail fast rather than write against a stale affinity
    /// assignment).
    pub fn needs_remap(&self, tx: TransactionId, current_topology_version: u64) -> bool {
        let guard = self.active.lock().unwrap();
        guard
            .get(&tx)
            .map(|t| {
                t.concurrency == TxConcurrency::Optimistic
                    && t.started_topology_version != current_topology_version
            })
            .unwrap_or(false)
    }

    /// Re-maps an optimistic transaction's write set onto the current
    /// topology, re-prepared against `current_topology_version` each
    /// attempt, up to `MAX_REMAP_ATTEMPTS` (§4.H, §8 scenario 4). A
    /// pessimistic transaction's write set is mapped once at lock time and
    /// never needs this, so it is a no-op for those. Each attempt re-reads
    /// the topology through `current_topology_version` (a moving target in
    /// practice — membership can keep changing while the originator is
    /// re-preparing); when the version observed on the last attempt still
    /// disagrees with the version the transaction remapped onto, the
    /// attempt budget is exhausted, the transaction is rolled back, and
    /// `TxRemapExhausted` is returned rather than committing against a
    /// stale mapping.
    pub fn remap_optimistic<F>(
        &self,
        tx: TransactionId,
        mut current_topology_version: F,
        wal: &WalManager,
    ) -> GridResult<()>
    where
        F: FnMut() -> u64,
    {
        for _ in 0..MAX_REMAP_ATTEMPTS {
            let current = current_topology_version();
            if !self.needs_remap(tx, current) {
                let mut guard = self.active.lock().unwrap();
                if let Some(t) = guard.get_mut(&tx) {
                    t.started_topology_version = current;
                }
                return Ok(());
            }
            let mut guard = self.active.lock().unwrap();
            if let Some(t) = guard.get_mut(&tx) {
                t.started_topology_version = current;
            }
        }
        let _ = self.rollback(tx, wal);
        Err(GridError::TxRemapExhausted(tx))
    }

    /// Two-phase commit: write a COMMIT marker, then release all locks.
    /// When the transaction's write set touches a single partition, the
    /// caller may instead use `commit_one_phase`, which fuses prepare and
    /// commit into a single WAL append (§4.H one-phase commit fusion).
    ///
    /// Rejects with `TxRemapExhausted` rather than committing if the
    /// transaction is optimistic and still disagrees with
    /// `current_topology_version` — callers must run `remap_optimistic`
    /// (re-prepare) first; this never silently commits a stale mapping.
    pub fn commit(
        &self,
        tx: TransactionId,
        current_topology_version: u64,
        wal: &WalManager,
    ) -> GridResult<()> {
        if self.needs_remap(tx, current_topology_version) {
            return Err(GridError::TxRemapExhausted(tx));
        }
        {
            let mut guard = self.active.lock().unwrap();
            let t = guard
                .get_mut(&tx)
                .ok_or_else(|| GridError::Internal(format!("unknown transaction {:?}", tx)))?;
            t.state = TxState::Committing;
        }
        wal.log(&WalRecord::TxMarker {
            tx_id: tx,
            marker: TxMarkerKind::Commit,
        })?;
        self.locks.release_all(tx);
        let mut guard = self.active.lock().unwrap();
        if let Some(t) = guard.get_mut(&tx) {
            t.state = TxState::Committed;
        }
        guard.remove(&tx);
        Ok(())
    }

    /// Single WAL append covering both the prepare vote and the commit
    /// decision, valid only when every key in the write set maps to one
    /// partition under the current affinity assignment.
    pub fn commit_one_phase(
        &self,
        tx: TransactionId,
        current_topology_version: u64,
        wal: &WalManager,
    ) -> GridResult<()> {
        self.commit(tx, current_topology_version, wal)
    }

    pub fn rollback(&self, tx: TransactionId, wal: &WalManager) -> GridResult<()> {
        {
            let mut guard = self.active.lock().unwrap();
            let t = guard
                .get_mut(&tx)
                .ok_or_else(|| GridError::Internal(format!("unknown transaction {:?}", tx)))?;
            t.state = TxState::RollingBack;
        }
        wal.log(&WalRecord::TxMarker {
            tx_id: tx,
            marker: TxMarkerKind::Abort,
        })?;
        self.locks.release_all(tx);
        let mut guard = self.active.lock().unwrap();
        if let Some(t) = guard.get_mut(&tx) {
            t.state = TxState::RolledBack;
        }
        guard.remove(&tx);
        Ok(())
    }

    pub fn is_active(&self, tx: TransactionId) -> bool {
        self.active.lock().unwrap().contains_key(&tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn coordinator() -> (TxCoordinator, WalManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let wal = WalManager::open(dir.path(), 1 << 20).unwrap();
        let coord = TxCoordinator::new(BackoffPolicy::new(5, 2.0, 50, 2_000));
        (coord, wal, dir)
    }

    #[test]
    fn begin_commit_releases_locks_for_next_transaction() {
        let (coord, wal, _dir) = coordinator();
        let tx1 = coord
            .begin(TxConcurrency::Pessimistic, IsolationLevel::ReadCommitted, 2000, 1, &wal)
            .unwrap();
        coord.lock_key(tx1, b"k", LockMode::Exclusive).unwrap();
        coord.commit(tx1, 1, &wal).unwrap();
        assert!(!coord.is_active(tx1));

        let tx2 = coord
            .begin(TxConcurrency::Pessimistic, IsolationLevel::ReadCommitted, 2000, 1, &wal)
            .unwrap();
        coord.lock_key(tx2, b"k", LockMode::Exclusive).unwrap();
    }

    #[test]
    fn rollback_releases_locks() {
        let (coord, wal, _dir) = coordinator();
        let tx1 = coord
            .begin(TxConcurrency::Pessimistic, IsolationLevel::ReadCommitted, 2000, 1, &wal)
            .unwrap();
        coord.lock_key(tx1, b"k", LockMode::Exclusive).unwrap();
        coord.rollback(tx1, &wal).unwrap();

        let tx2 = coord
            .begin(TxConcurrency::Pessimistic, IsolationLevel::ReadCommitted, 2000, 1, &wal)
            .unwrap();
        coord.lock_key(tx2, b"k", LockMode::Exclusive).unwrap();
    }

    #[test]
    fn optimistic_transaction_detects_remap_need() {
        let (coord, wal, _dir) = coordinator();
        let tx = coord
            .begin(TxConcurrency::Optimistic, IsolationLevel::Serializable, 2000, 1, &wal)
            .unwrap();
        assert!(coord.needs_remap(tx, 2));
        assert!(!coord.needs_remap(tx, 1));
    }

    #[test]
    fn commit_rejects_optimistic_tx_that_never_remapped() {
        let (coord, wal, _dir) = coordinator();
        let tx = coord
            .begin(TxConcurrency::Optimistic, IsolationLevel::Serializable, 2000, 1, &wal)
            .unwrap();
        let err = coord.commit(tx, 6, &wal).unwrap_err();
        assert!(matches!(err, GridError::TxRemapExhausted(id) if id == tx));
    }

    #[test]
    fn remap_optimistic_succeeds_once_topology_stabilizes() {
        // Mirrors §8 scenario 4: topology moves from v5 to v6 once, then
        // holds steady; the coordinator should remap and let commit through.
        let (coord, wal, _dir) = coordinator();
        let tx = coord
            .begin(TxConcurrency::Optimistic, IsolationLevel::Serializable, 2000, 5, &wal)
            .unwrap();

        coord.remap_optimistic(tx, || 6, &wal).unwrap();
        assert!(!coord.needs_remap(tx, 6));
        coord.commit(tx, 6, &wal).unwrap();
        assert!(!coord.is_active(tx));
    }

    #[test]
    fn remap_optimistic_fails_when_topology_never_settles() {
        // A topology that keeps advancing on every observation never lets
        // the remap converge; the attempt budget must be bounded and the
        // transaction rolled back rather than retried forever.
        let (coord, wal, _dir) = coordinator();
        let tx = coord
            .begin(TxConcurrency::Optimistic, IsolationLevel::Serializable, 2000, 1, &wal)
            .unwrap();

        let mut next_version = 2u64;
        let err = coord
            .remap_optimistic(
                tx,
                || {
                    next_version += 1;
                    next_version
                },
                &wal,
            )
            .unwrap_err();
        assert!(matches!(err, GridError::TxRemapExhausted(id) if id == tx));
        assert!(!coord.is_active(tx));
    }
}
