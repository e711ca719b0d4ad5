//! Transaction coordinator (component H/I of the storage core): lock
//! manager, wait-for graph deadlock detection, backoff, and the
//! prepare/commit/rollback protocol. Grounded on the teacher's
//! `transaction/tx.rs`, `transaction/concurrent_status.rs` and
//! `transaction/wait_for_graph.rs`.

pub mod backoff;
pub mod coordinator;
pub mod lock_manager;
pub mod transaction;
pub mod wait_for_graph;

pub use backoff::BackoffPolicy;
pub use coordinator::TxCoordinator;
pub use lock_manager::LockManager;
pub use transaction::{IsolationLevel, Transaction, TransactionId, TxConcurrency, TxState};
pub use wait_for_graph::WaitForGraph;
