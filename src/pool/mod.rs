pub mod intern;
pub mod reclaim;

pub use intern::Pool;
pub use reclaim::{PoolEntry, PoolUsage, ReclaimSummary};
