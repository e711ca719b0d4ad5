pub mod file_page_store;

pub use file_page_store::{AlignedBounceBuffer, FilePageStore};
