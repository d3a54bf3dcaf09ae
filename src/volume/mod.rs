//! Host side
//!
//! Each storage host runs:
//! - A local sync loop that fetches its assigned segments and keeps their
//!   health checks alive (reconciler)
//! - Optionally, a write API gated on the segment's write lock (http, write)

pub mod http;
pub mod reconciler;
pub mod server;
pub mod sqlite;
pub mod write;

pub use http::{create_router, WriteState};
pub use reconciler::{LocalReconciler, ReconcileReport};
pub use server::{LocalSync, WriteServer};
pub use write::{Denial, WriteAuthorizer};
