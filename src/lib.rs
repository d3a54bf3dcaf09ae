//! # segmentd
//!
//! Placement and liveness for a fleet of hosts serving file-backed database
//! segments (one SQLite file per shard):
//! - Leader election for a single sync master over a TTL lease
//! - Replica placement with a minimum of two claims per segment
//! - Rebalancing toward underloaded hosts
//! - Per-host reconciliation of assigned segments, advertised behind TTL
//!   health checks
//! - A write API gated on the segment's write lock
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!          ┌──────────────────────────────┐
//!          │   Coordination store (KV,    │
//!          │   catalog, TTL checks)       │
//!          └──────┬────────────────┬──────┘
//!                 │                │
//!    ┌────────────▼───┐     ┌──────▼───────────────┐
//!    │  Sync master   │     │  Local sync (every   │
//!    │  (elected)     │     │  host)               │
//!    │  - placement   │     │  - copy segments     │
//!    │  - rebalance   │     │  - advertise + TTL   │
//!    └───────┬────────┘     └──────┬───────────────┘
//!            │   listing           │  copy
//!          ┌─▼─────────────────────▼─┐
//!          │   Segment source (HDFS) │
//!          └─────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start the sync master
//! ```bash
//! segmentd-sync --server --config /etc/segmentd.toml
//! ```
//!
//! ### Start the local sync on a storage host
//! ```bash
//! segmentd-sync --config /etc/segmentd.toml
//! ```
//!
//! ### Start the write API
//! ```bash
//! segmentd-write --config /etc/segmentd.toml
//! curl -X POST -H 'Host: seg1.write.local' --data 'INSERT INTO t VALUES (1)' http://localhost:6333/
//! ```

pub mod common;
pub mod consul;
pub mod coordinator;
pub mod hdfs;
pub mod volume;

// Re-export commonly used types
pub use common::{Error, Result, Settings, SyncMode};
pub use coordinator::SyncMaster;
pub use volume::{LocalSync, WriteServer};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
