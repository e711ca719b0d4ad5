//! Integration tests for the transaction coordinator driven against a real
//! `WalManager`, covering §8 scenarios 3 (pessimistic deadlock), 4
//! (optimistic remap) and 5 (one-phase commit).

use gridstore_core::tx::{
    BackoffPolicy, IsolationLevel, TxConcurrency, TxCoordinator,
};
use gridstore_core::wal::WalManager;

use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

fn setup() -> (Arc<TxCoordinator>, Arc<WalManager>, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let wal = Arc::new(WalManager::open(dir.path(), 1 << 20).unwrap());
    let coord = Arc::new(TxCoordinator::new(BackoffPolicy::new(20, 2.0, 50, 5_000)));
    (coord, wal, dir)
}

/// §8 scenario 3: three transactions waiting on each other's held keys in a
/// cycle. Exactly one must be aborted with a deadlock error; the other two
/// must be able to finish their work.
#[test]
fn cyclic_wait_graph_aborts_exactly_one_transaction() {
    use gridstore_core::tx::lock_manager::LockMode;

    let (coord, wal, _dir) = setup();
    let t1 = coord
        .begin(TxConcurrency::Pessimistic, IsolationLevel::ReadCommitted, 5000, 1, &wal)
        .unwrap();
    let t2 = coord
        .begin(TxConcurrency::Pessimistic, IsolationLevel::ReadCommitted, 5000, 1, &wal)
        .unwrap();
    let t3 = coord
        .begin(TxConcurrency::Pessimistic, IsolationLevel::ReadCommitted, 5000, 1, &wal)
        .unwrap();

    // T1 holds k0, T2 holds k1, T3 holds k2.
    coord.lock_key(t1, b"k0", LockMode::Exclusive).unwrap();
    coord.lock_key(t2, b"k1", LockMode::Exclusive).unwrap();
    coord.lock_key(t3, b"k2", LockMode::Exclusive).unwrap();

    let coord1 = coord.clone();
    let h1 = thread::spawn(move || coord1.lock_key(t1, b"k1", LockMode::Exclusive));
    let coord2 = coord.clone();
    let h2 = thread::spawn(move || coord2.lock_key(t2, b"k2", LockMode::Exclusive));
    let coord3 = coord.clone();
    let h3 = thread::spawn(move || coord3.lock_key(t3, b"k0", LockMode::Exclusive));

    let results = [h1.join().unwrap(), h2.join().unwrap(), h3.join().unwrap()];
    let aborted = results.iter().filter(|r| r.is_err()).count();
    assert_eq!(aborted, 1, "exactly one transaction in the cycle must be aborted");

    for (tx, result) in [(t1, &results[0]), (t2, &results[1]), (t3, &results[2])] {
        if result.is_ok() {
            coord.commit(tx, 1, &wal).unwrap();
        } else {
            coord.rollback(tx, &wal).unwrap();
        }
    }
}

/// §8 scenario 4: an optimistic transaction started at one topology version
/// must be told to remap once the coordinator observes a newer version, and
/// commits successfully afterward against the new mapping.
#[test]
fn optimistic_transaction_remaps_after_topology_change() {
    let (coord, wal, _dir) = setup();
    let tx = coord
        .begin(TxConcurrency::Optimistic, IsolationLevel::Serializable, 5000, 5, &wal)
        .unwrap();

    assert!(!coord.needs_remap(tx, 5), "no remap needed while topology is unchanged");
    assert!(coord.needs_remap(tx, 6), "remap needed once topology moves from 5 to 6");

    coord.remap_optimistic(tx, || 6, &wal).unwrap();
    assert!(!coord.needs_remap(tx, 6), "remap resolved the write set onto v6");
    coord.commit(tx, 6, &wal).unwrap();
}

/// A commit attempted without remapping first must not silently apply
/// against the stale mapping: it has to fail so the caller re-prepares.
#[test]
fn commit_without_remap_fails_once_topology_has_moved() {
    let (coord, wal, _dir) = setup();
    let tx = coord
        .begin(TxConcurrency::Optimistic, IsolationLevel::Serializable, 5000, 5, &wal)
        .unwrap();

    assert!(coord.commit(tx, 6, &wal).is_err());
}

/// §4.H: budget exhaustion on a continually-moving topology must fail the
/// transaction rather than retry forever.
#[test]
fn optimistic_remap_budget_exhaustion_fails_the_transaction() {
    let (coord, wal, _dir) = setup();
    let tx = coord
        .begin(TxConcurrency::Optimistic, IsolationLevel::Serializable, 5000, 1, &wal)
        .unwrap();

    let mut version = 1u64;
    let result = coord.remap_optimistic(
        tx,
        || {
            version += 1;
            version
        },
        &wal,
    );
    assert!(result.is_err());
    assert!(!coord.is_active(tx), "exhausted transaction must be rolled back");
}

/// §8 scenario 5: a single-primary write set can fuse prepare and commit
/// into one WAL append, never passing through a separate PREPARED wait.
#[test]
fn one_phase_commit_applies_single_primary_write_set() {
    use gridstore_core::tx::lock_manager::LockMode;

    let (coord, wal, _dir) = setup();
    let tx = coord
        .begin(TxConcurrency::Pessimistic, IsolationLevel::ReadCommitted, 5000, 1, &wal)
        .unwrap();
    coord.lock_key(tx, b"only-key", LockMode::Exclusive).unwrap();

    coord.commit_one_phase(tx, 1, &wal).unwrap();
    assert!(!coord.is_active(tx));
}
