pub mod comparator;
pub mod tree;

pub use comparator::{compare_prefixes, resolve_tie, PrefixOrdering, SearchRow};
pub use tree::BTree;
