pub mod affinity;
pub mod partition;
pub mod state;

pub use affinity::{AffinityCache, AffinityFunction, NodeId, RendezvousAffinity};
pub use partition::{EntriesMap, Entry, Partition};
pub use state::{PartitionReservation, PartitionState, PartitionStateWord};
