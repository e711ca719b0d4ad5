//! Inline-prefix key comparison. Grounded on the teacher's
//! `btree/table/table.rs` `find_leaf_page`/`SearchFor` (compares an
//! `IntField` against each internal entry's key in slot order),
//! generalized from a fixed 4-byte integer key to an arbitrary
//! inline-prefix byte string with a "cannot decide from the prefix alone"
//! sentinel (§4.E: "keys longer than the inline budget fall back to a
//! full-row comparator").

use std::cmp::Ordering;

use crate::pageid::RowLink;

/// Anything the tree can compare against an on-page inline prefix: the
/// search key itself, or a full stored row when the prefix alone cannot
/// decide the order.
pub trait SearchRow {
    fn inline_prefix(&self) -> &[u8];
    fn full_key(&self) -> &[u8];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOrdering {
    Less,
    Equal,
    Greater,
    /// The inline prefixes are equal up to the shorter one's length but at
    /// least one key's full representation is longer than what was
    /// inlined: the comparator cannot decide without reading the full row.
    CannotDecide,
}

/// Compares two inline prefixes byte-by-byte. If one is a prefix of the
/// other and the keys' full lengths could differ beyond what's inlined,
/// returns `CannotDecide` rather than guessing equal.
pub fn compare_prefixes(a: &[u8], b: &[u8], a_is_truncated: bool, b_is_truncated: bool) -> PrefixOrdering {
    let common = a.len().min(b.len());
    match a[..common].cmp(&b[..common]) {
        Ordering::Less => PrefixOrdering::Less,
        Ordering::Greater => PrefixOrdering::Greater,
        Ordering::Equal => {
            if a.len() == b.len() && !a_is_truncated && !b_is_truncated {
                PrefixOrdering::Equal
            } else {
                PrefixOrdering::CannotDecide
            }
        }
    }
}

/// Resolves a `CannotDecide` by falling back to the full key, then (for
/// non-unique indexes, where two distinct rows can carry equal keys)
/// tie-breaking by row link so the tree still has a total order to walk
/// (§4.E: "link-based tie-break for non-unique indexes"; a unique index
/// instead treats equal full keys as the same entry for replacement).
pub fn resolve_tie(
    a_full: &[u8],
    b_full: &[u8],
    a_link: Option<RowLink>,
    b_link: Option<RowLink>,
    unique: bool,
) -> Ordering {
    match a_full.cmp(b_full) {
        Ordering::Equal if !unique => match (a_link, b_link) {
            (Some(x), Some(y)) => (x.page_id.encode(), x.item_id).cmp(&(y.page_id.encode(), y.item_id)),
            _ => Ordering::Equal,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pageid::{PageFlag, PageId};

    #[test]
    fn simple_prefix_ordering() {
        assert_eq!(compare_prefixes(b"abc", b"abd", false, false), PrefixOrdering::Less);
        assert_eq!(compare_prefixes(b"abd", b"abc", false, false), PrefixOrdering::Greater);
        assert_eq!(compare_prefixes(b"abc", b"abc", false, false), PrefixOrdering::Equal);
    }

    #[test]
    fn truncated_equal_prefix_cannot_decide() {
        assert_eq!(compare_prefixes(b"abc", b"abc", true, false), PrefixOrdering::CannotDecide);
    }

    #[test]
    fn non_unique_index_breaks_tie_by_link() {
        let a = RowLink::new(PageId::new(PageFlag::Data, 0, 1), 0);
        let b = RowLink::new(PageId::new(PageFlag::Data, 0, 1), 1);
        assert_eq!(resolve_tie(b"k", b"k", Some(a), Some(b), false), Ordering::Less);
    }

    #[test]
    fn unique_index_treats_equal_keys_as_equal() {
        let a = RowLink::new(PageId::new(PageFlag::Data, 0, 1), 0);
        let b = RowLink::new(PageId::new(PageFlag::Data, 0, 1), 1);
        assert_eq!(resolve_tie(b"k", b"k", Some(a), Some(b), true), Ordering::Equal);
    }
}
