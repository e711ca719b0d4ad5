//! Affinity function: maps `(key, topology_version)` to an ordered list of
//! owning nodes (primary first, then backups), and caches that mapping per
//! `(cache_name, topology_version)` pair (§3, §4.G). Not grounded on a
//! direct teacher equivalent (the teacher has no cluster topology at all);
//! the cache-with-aging structure follows the bounded-map idiom used by
//! [[partition]]'s deferred-delete queue.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{GridError, GridResult};

pub type NodeId = u32;

/// Topology version drift beyond which a cached assignment is considered
/// stale and recomputed rather than served, even if no explicit
/// invalidation arrived (§4.G edge case).
const MAX_TOPOLOGY_DRIFT: u64 = 10;

/// Maps a key to the partition that owns it, then the partition to its
/// ordered list of owning nodes. `partition_count` and `backup_count` are
/// fixed for the cache group's lifetime.
pub trait AffinityFunction: Send + Sync {
    fn partition_for(&self, key: &[u8], partition_count: u16) -> u16;
    fn assign(
        &self,
        partition_id: u16,
        topology_version: u64,
        nodes: &[NodeId],
        backup_count: usize,
    ) -> Vec<NodeId>;
}

/// Rendezvous-style (highest random weight) assignment: deterministic,
/// stable under node addition/removal, generalized from the spec's literal
/// "affinity function maps (key, topologyVersion) to an ordered owner
/// list" without committing to hash-ring bucket placement (an Open
/// Question left to callers that need exact compatibility with a specific
/// scheme).
pub struct RendezvousAffinity;

impl AffinityFunction for RendezvousAffinity {
    fn partition_for(&self, key: &[u8], partition_count: u16) -> u16 {
        let hash = fnv1a(key);
        (hash % partition_count as u64) as u16
    }

    fn assign(
        &self,
        partition_id: u16,
        topology_version: u64,
        nodes: &[NodeId],
        backup_count: usize,
    ) -> Vec<NodeId> {
        if nodes.is_empty() {
            return Vec::new();
        }
        let mut weighted: Vec<(u64, NodeId)> = nodes
            .iter()
            .map(|&n| (weight(partition_id, topology_version, n), n))
            .collect();
        weighted.sort_by(|a, b| b.0.cmp(&a.0));
        weighted
            .into_iter()
            .take(1 + backup_count)
            .map(|(_, n)| n)
            .collect()
    }
}

fn fnv1a(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn weight(partition_id: u16, topology_version: u64, node: NodeId) -> u64 {
    fnv1a(&[
        &partition_id.to_be_bytes()[..],
        &topology_version.to_be_bytes()[..],
        &node.to_be_bytes()[..],
    ]
    .concat())
}

struct CacheEntry {
    topology_version: u64,
    owners: Vec<NodeId>,
}

/// Caches `(cache_name, topology_version) -> owners` assignments, aging
/// out entries whose topology version has drifted too far from the
/// current one and purging a node's entries outright on NODE_LEFT/FAILED.
pub struct AffinityCache {
    function: Box<dyn AffinityFunction>,
    entries: RwLock<HashMap<(String, u16), CacheEntry>>,
}

impl AffinityCache {
    pub fn new(function: Box<dyn AffinityFunction>) -> Self {
        Self {
            function,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn owners(
        &self,
        cache_name: &str,
        key: &[u8],
        partition_count: u16,
        topology_version: u64,
        nodes: &[NodeId],
        backup_count: usize,
    ) -> GridResult<Vec<NodeId>> {
        let partition_id = self.function.partition_for(key, partition_count);
        let cache_key = (cache_name.to_string(), partition_id);

        if let Some(entry) = self.entries.read().unwrap().get(&cache_key) {
            let drift = topology_version.saturating_sub(entry.topology_version);
            if drift < MAX_TOPOLOGY_DRIFT && entry.topology_version == topology_version {
                return Ok(entry.owners.clone());
            }
        }

        let owners = self.function.assign(partition_id, topology_version, nodes, backup_count);
        if owners.is_empty() {
            return Err(GridError::AffinityUnavailable);
        }
        self.entries.write().unwrap().insert(
            cache_key,
            CacheEntry {
                topology_version,
                owners: owners.clone(),
            },
        );
        Ok(owners)
    }

    /// Invalidates every cached assignment naming `node`, called when the
    /// cluster observes that node leave or fail.
    pub fn purge_node(&self, node: NodeId) {
        self.entries.write().unwrap().retain(|_, entry| !entry.owners.contains(&node));
    }

    /// Ages out every cached assignment whose topology version has drifted
    /// `MAX_TOPOLOGY_DRIFT` or more behind `current_topology_version`.
    /// Called on a delay after a `NODE_LEFT`/`NODE_FAILED` event (§4.G
    /// "Affinity cache eviction", §8 scenario 6); `purge_node` handles the
    /// immediate "no member left" half of that same trigger.
    pub fn age_out(&self, current_topology_version: u64) {
        self.entries.write().unwrap().retain(|_, entry| {
            current_topology_version.saturating_sub(entry.topology_version) < MAX_TOPOLOGY_DRIFT
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_is_deterministic_for_same_inputs() {
        let f = RendezvousAffinity;
        let a = f.assign(3, 1, &[1, 2, 3, 4], 1);
        let b = f.assign(3, 1, &[1, 2, 3, 4], 1);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn cache_serves_same_topology_version_from_cache() {
        let cache = AffinityCache::new(Box::new(RendezvousAffinity));
        let a = cache.owners("c", b"k", 16, 1, &[1, 2, 3], 1).unwrap();
        let b = cache.owners("c", b"k", 16, 1, &[9, 9, 9], 1).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn purge_node_drops_affected_entries() {
        let cache = AffinityCache::new(Box::new(RendezvousAffinity));
        let owners = cache.owners("c", b"k", 16, 1, &[1, 2, 3], 1).unwrap();
        cache.purge_node(owners[0]);
        let refreshed = cache.owners("c", b"k", 16, 1, &[4, 5, 6], 1).unwrap();
        assert!(!refreshed.contains(&owners[0]));
    }

    #[test]
    fn empty_node_list_is_affinity_unavailable() {
        let cache = AffinityCache::new(Box::new(RendezvousAffinity));
        assert!(cache.owners("c", b"k", 16, 1, &[], 1).is_err());
    }

    #[test]
    fn age_out_drops_only_stale_topology_versions() {
        let cache = AffinityCache::new(Box::new(RendezvousAffinity));
        for partition_id in 0..10u16 {
            let topology_version = 10 + partition_id as u64;
            cache
                .entries
                .write()
                .unwrap()
                .insert(
                    ("c".to_string(), partition_id),
                    CacheEntry {
                        topology_version,
                        owners: vec![1, 2],
                    },
                );
        }
        cache.age_out(30);
        let remaining: Vec<_> = cache
            .entries
            .read()
            .unwrap()
            .iter()
            .map(|(_, e)| e.topology_version)
            .collect();
        assert!(remaining.iter().all(|&v| v >= 20));
        assert!(remaining.len() < 10);
    }
}
