pub mod manager;
pub mod record;

pub use manager::WalManager;
pub use record::{PayloadRef, RecordTag, TxMarkerKind, WalRecord};
