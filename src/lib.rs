//! `gridstore-core`: a transactional partitioned cache core on top of a
//! page-based storage engine with write-ahead logging.
//!
//! Modules, leaves first:
//! - [`pageid`] / [`version`] — PageId, row link and WAL pointer arithmetic,
//!   `GridCacheVersion` (component A, §3-4.A).
//! - [`store`] — fixed-size page file I/O, optional aligned direct I/O
//!   (component B, §4.B).
//! - [`wal`] — append-only record log, replay (component C, §4.C).
//! - [`memory`] — resident page cache, latches, checkpoint read lock
//!   (component D, §4.D).
//! - [`btree`] — generic on-page B+Tree with inline-prefix comparison and
//!   link-based tie-break (component E, §4.E).
//! - [`page`] — fixed page layout: the shared header plus the data page
//!   item directory (§6 External Interfaces).
//! - [`row`] — fragmented row payload store over data pages (component F,
//!   §4.F).
//! - [`partition`] — affinity function, per-partition state machine,
//!   affinity cache (component G, §4.G).
//! - [`tx`] — transaction coordinator: lock manager, wait-for graph,
//!   backoff, prepare/commit/rollback (component H, §4.H).
//! - [`vacuum`] — MVCC vacuum workers (component I, §4.I).
//! - [`message`] — wire message framing and the in-process message bus
//!   stand-in (component J, §6).
//! - [`config`] / [`error`] / [`log`] — ambient stack: typed configuration,
//!   structured errors, logging setup (SPEC_FULL J.1-J.3).
//! - [`context`] — `GridContext`, the explicit handle replacing the
//!   teacher's global singleton (§9 "global mutable state").

pub mod btree;
pub mod config;
pub mod context;
pub mod error;
pub mod log;
pub mod memory;
pub mod message;
pub mod page;
pub mod pageid;
pub mod partition;
pub mod row;
pub mod store;
pub mod tx;
pub mod vacuum;
pub mod version;

pub use config::GridConfig;
pub use context::GridContext;
pub use error::{GridError, GridResult};
pub use pageid::{PageFlag, PageId, RowLink, WalPointer};
pub use version::GridCacheVersion;
