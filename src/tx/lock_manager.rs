//! Per-key lock table. Grounded on the teacher's
//! `transaction/concurrent_status.rs` (`s_latch_map`/`x_latch_map`,
//! `request_latch`/`add_latch`, wait-for graph wiring), generalized from
//! per-B+Tree-page latches to per-cache-key locks, and made reentrant: a
//! transaction may re-acquire a lock it already holds without blocking on
//! itself (§3: "at-most-once lock acquisition per (tx, key) pair").

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::error::{GridError, GridResult};
use crate::tx::wait_for_graph::WaitForGraph;
use crate::tx::TransactionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct LockTableInner {
    shared: HashMap<Vec<u8>, HashSet<TransactionId>>,
    exclusive: HashMap<Vec<u8>, TransactionId>,
    held_by_tx: HashMap<TransactionId, HashSet<(Vec<u8>, LockMode)>>,
    waits_for: WaitForGraph,
}

/// Tracks per-key shared/exclusive locks across all active transactions and
/// the waits-for graph used to detect deadlocks between them.
pub struct LockManager {
    inner: Mutex<LockTableInner>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LockTableInner {
                shared: HashMap::new(),
                exclusive: HashMap::new(),
                held_by_tx: HashMap::new(),
                waits_for: WaitForGraph::new(),
            }),
        }
    }

    /// Attempts to grant `mode` on `key` to `tx` without blocking. Returns
    /// `Ok(true)` if granted, `Ok(false)` if the key is held incompatibly by
    /// another transaction (caller should back off and retry), or an error
    /// if granting would complete a deadlock cycle.
    pub fn try_acquire(&self, tx: TransactionId, key: &[u8], mode: LockMode) -> GridResult<bool> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(&holder) = inner.exclusive.get(key) {
            if holder == tx {
                inner
                    .held_by_tx
                    .entry(tx)
                    .or_insert_with(HashSet::new)
                    .insert((key.to_vec(), mode));
                return Ok(true);
            }
            inner.waits_for.add_edge(tx, holder);
            if let Some(cycle) = inner.waits_for.find_cycle() {
                let victim = *cycle.iter().max().unwrap();
                inner.waits_for.remove_edge(tx, holder);
                if victim == tx {
                    return Err(GridError::TxDeadlock(tx));
                }
            }
            return Ok(false);
        }

        if mode == LockMode::Exclusive {
            if let Some(holders) = inner.shared.get(key) {
                let others: Vec<_> = holders.iter().filter(|&&h| h != tx).cloned().collect();
                if !others.is_empty() {
                    for holder in &others {
                        inner.waits_for.add_edge(tx, *holder);
                    }
                    if let Some(cycle) = inner.waits_for.find_cycle() {
                        let victim = *cycle.iter().max().unwrap();
                        for holder in &others {
                            inner.waits_for.remove_edge(tx, *holder);
                        }
                        if victim == tx {
                            return Err(GridError::TxDeadlock(tx));
                        }
                    }
                    return Ok(false);
                }
            }
            inner.exclusive.insert(key.to_vec(), tx);
        } else {
            inner
                .shared
                .entry(key.to_vec())
                .or_insert_with(HashSet::new)
                .insert(tx);
        }

        inner.waits_for.remove_transaction(tx);
        inner
            .held_by_tx
            .entry(tx)
            .or_insert_with(HashSet::new)
            .insert((key.to_vec(), mode));
        Ok(true)
    }

    /// Releases every lock held by `tx` (called on commit/rollback).
    pub fn release_all(&self, tx: TransactionId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(held) = inner.held_by_tx.remove(&tx) {
            for (key, mode) in held {
                match mode {
                    LockMode::Exclusive => {
                        if inner.exclusive.get(&key) == Some(&tx) {
                            inner.exclusive.remove(&key);
                        }
                    }
                    LockMode::Shared => {
                        if let Some(holders) = inner.shared.get_mut(&key) {
                            holders.remove(&tx);
                            if holders.is_empty() {
                                inner.shared.remove(&key);
                            }
                        }
                    }
                }
            }
        }
        inner.waits_for.remove_transaction(tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentrant_acquire_does_not_block_self() {
        let lm = LockManager::new();
        let tx = TransactionId(1);
        assert!(lm.try_acquire(tx, b"k", LockMode::Exclusive).unwrap());
        assert!(lm.try_acquire(tx, b"k", LockMode::Exclusive).unwrap());
    }

    #[test]
    fn exclusive_blocks_other_transaction() {
        let lm = LockManager::new();
        let a = TransactionId(1);
        let b = TransactionId(2);
        assert!(lm.try_acquire(a, b"k", LockMode::Exclusive).unwrap());
        assert!(!lm.try_acquire(b, b"k", LockMode::Exclusive).unwrap());
    }

    #[test]
    fn release_unblocks_waiter() {
        let lm = LockManager::new();
        let a = TransactionId(1);
        let b = TransactionId(2);
        assert!(lm.try_acquire(a, b"k", LockMode::Exclusive).unwrap());
        assert!(!lm.try_acquire(b, b"k", LockMode::Exclusive).unwrap());
        lm.release_all(a);
        assert!(lm.try_acquire(b, b"k", LockMode::Exclusive).unwrap());
    }

    #[test]
    fn shared_locks_are_compatible() {
        let lm = LockManager::new();
        let a = TransactionId(1);
        let b = TransactionId(2);
        assert!(lm.try_acquire(a, b"k", LockMode::Shared).unwrap());
        assert!(lm.try_acquire(b, b"k", LockMode::Shared).unwrap());
    }
}
