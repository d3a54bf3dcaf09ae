//! Sync master
//!
//! The master is responsible for:
//! - Holding the master lease (election)
//! - Keeping every segment at its minimum replica count (placement)
//! - Feeding underloaded hosts (rebalancing)
//! - Host membership, load and health checks (registry)

pub mod election;
pub mod placement;
pub mod rebalance;
pub mod registry;
pub mod segment;
pub mod server;

pub use election::{ElectionManager, SyncRole};
pub use placement::{PlacementEngine, PlacementReport};
pub use rebalance::{RebalanceEngine, RebalanceReport};
pub use registry::{CheckTtl, HostRecord, HostRegistry, HostRole, Pool};
pub use segment::{Assignment, Segment, MINIMUM_ASSIGNMENTS};
pub use server::{MasterPass, SyncMaster};
