//! `GridCacheVersion` and its fixed-width wire encoding (§3, §6).

use std::cmp::Ordering;
use std::io::{self, Read, Write};

/// `(topologyVersion, nodeOrderAndDrId, globalTime, order)`. Newer versions
/// compare strictly greater on `(topology_version, order)`, lexicographically;
/// `node_order_and_dr_id` and `global_time` are carried on the wire for
/// display/debugging and never participate in ordering or identity,
/// mirroring the teacher's `TransactionID` being a bare monotonic counter
/// with no secondary comparison key.
#[derive(Debug, Clone, Copy)]
pub struct GridCacheVersion {
    pub topology_version: i32,
    pub node_order_and_dr_id: i32,
    pub global_time: i64,
    pub order: i64,
}

const TAG_NULL: u8 = 0;
const TAG_VERSION: u8 = 1;

impl GridCacheVersion {
    pub fn new(topology_version: i32, node_order_and_dr_id: i32, order: i64) -> Self {
        Self::with_global_time(topology_version, node_order_and_dr_id, 0, order)
    }

    pub fn with_global_time(
        topology_version: i32,
        node_order_and_dr_id: i32,
        global_time: i64,
        order: i64,
    ) -> Self {
        Self {
            topology_version,
            node_order_and_dr_id,
            global_time,
            order,
        }
    }

    /// Writes the 1-byte tag followed by the fixed 24-byte payload
    /// (`topology_version:i32 | node_order_and_dr_id:i32 | global_time:i64 |
    /// order:i64`) when `Some`, or just the null tag (1 byte total) when
    /// `None` — 25 bytes total for a non-null version, per §3/§6.
    pub fn write<W: Write>(version: Option<&GridCacheVersion>, w: &mut W) -> io::Result<()> {
        match version {
            None => w.write_all(&[TAG_NULL]),
            Some(v) => {
                w.write_all(&[TAG_VERSION])?;
                w.write_all(&v.topology_version.to_be_bytes())?;
                w.write_all(&v.node_order_and_dr_id.to_be_bytes())?;
                w.write_all(&v.global_time.to_be_bytes())?;
                w.write_all(&v.order.to_be_bytes())
            }
        }
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Option<GridCacheVersion>, String> {
        let mut tag = [0u8; 1];
        r.read_exact(&mut tag).map_err(|e| e.to_string())?;
        match tag[0] {
            TAG_NULL => Ok(None),
            TAG_VERSION => {
                let mut buf4 = [0u8; 4];
                r.read_exact(&mut buf4).map_err(|e| e.to_string())?;
                let topology_version = i32::from_be_bytes(buf4);
                r.read_exact(&mut buf4).map_err(|e| e.to_string())?;
                let node_order_and_dr_id = i32::from_be_bytes(buf4);
                let mut buf8 = [0u8; 8];
                r.read_exact(&mut buf8).map_err(|e| e.to_string())?;
                let global_time = i64::from_be_bytes(buf8);
                r.read_exact(&mut buf8).map_err(|e| e.to_string())?;
                let order = i64::from_be_bytes(buf8);
                Ok(Some(GridCacheVersion::with_global_time(
                    topology_version,
                    node_order_and_dr_id,
                    global_time,
                    order,
                )))
            }
            other => Err(format!("unknown GridCacheVersion protocol tag: {}", other)),
        }
    }
}

/// Identity and hashing follow `Ord`: only `(topology_version, order)`
/// distinguish versions. `node_order_and_dr_id`/`global_time` are wire
/// payload, not part of a version's identity, so they are deliberately
/// excluded here to keep `Eq` consistent with `Ord` (two versions that
/// compare equal must also be `==`, e.g. for `BTreeMap`/`max` lookups).
impl PartialEq for GridCacheVersion {
    fn eq(&self, other: &Self) -> bool {
        self.topology_version == other.topology_version && self.order == other.order
    }
}

impl Eq for GridCacheVersion {}

impl std::hash::Hash for GridCacheVersion {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.topology_version.hash(state);
        self.order.hash(state);
    }
}

impl PartialOrd for GridCacheVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GridCacheVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.topology_version, self.order).cmp(&(other.topology_version, other.order))
    }
}
