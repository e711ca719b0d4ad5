pub mod vacuum;

pub use vacuum::{CleanupFn, VacuumPool, VacuumStats, VacuumTask};
