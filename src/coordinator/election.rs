//! Sync master election
//!
//! Leadership is a lease held through a singleton service registration and
//! its TTL check. The master renews the check every election; a master that
//! misses two elections lets the check expire and the next candidate
//! registers itself.
//!
//! The store only offers plain reads and writes, so check-then-register is
//! not atomic: two candidates can both see no master and both register.
//! Every candidate reads the passing registrations in the same catalog order
//! and defers to the first one, so the loser stops renewing and its lease
//! expires. Master-side work is idempotent, which makes the overlap window
//! harmless.

use crate::common::Result;
use crate::consul::ServiceRegistration;
use crate::coordinator::registry::{CheckTtl, HostRegistry, Pool, SYNC_MASTER_SERVICE};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

const MASTER_SERVICE: &str = "master";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRole {
    Follower,
    Leader,
}

impl std::fmt::Display for SyncRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncRole::Follower => write!(f, "follower"),
            SyncRole::Leader => write!(f, "leader"),
        }
    }
}

pub struct ElectionManager {
    registry: HostRegistry,
    hostname: String,
    address: String,
    sync_port: u16,
    election_cycle: Duration,
    role: Mutex<SyncRole>,
    leader_id: Mutex<Option<String>>,
}

impl ElectionManager {
    pub fn new(
        registry: HostRegistry,
        hostname: impl Into<String>,
        address: impl Into<String>,
        sync_port: u16,
        election_cycle: Duration,
    ) -> Self {
        Self {
            registry,
            hostname: hostname.into(),
            address: address.into(),
            sync_port,
            election_cycle,
            role: Mutex::new(SyncRole::Follower),
            leader_id: Mutex::new(None),
        }
    }

    pub fn get_role(&self) -> SyncRole {
        *self.role.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_leader(&self) -> bool {
        self.get_role() == SyncRole::Leader
    }

    /// Master seen at the last election, if any
    pub fn get_leader(&self) -> Option<String> {
        self.leader_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, role: SyncRole, leader: Option<String>) {
        *self.role.lock().unwrap_or_else(PoisonError::into_inner) = role;
        *self.leader_id.lock().unwrap_or_else(PoisonError::into_inner) = leader;
    }

    /// Check or take the master lease. Call once per cycle.
    pub async fn hold_election(&self) -> Result<bool> {
        tracing::warn!("Holding sync master election...");
        let masters = self
            .registry
            .client()
            .healthy_service(SYNC_MASTER_SERVICE, None)
            .await?;

        if let Some(master) = masters.first() {
            if master.node == self.hostname {
                tracing::warn!(
                    "Still the master. I will check again in {:?}",
                    self.election_cycle
                );
                self.registry
                    .reset_health_check(Pool::Sync, MASTER_SERVICE)
                    .await?;
                self.record(SyncRole::Leader, Some(self.hostname.clone()));
                return Ok(true);
            }
            tracing::warn!(
                "I am not the master ({} is). I will check again in {:?}",
                master.node,
                self.election_cycle
            );
            self.record(SyncRole::Follower, Some(master.node.clone()));
            return Ok(false);
        }

        tracing::warn!(
            "There is no \"{}\" service. I am the master",
            SYNC_MASTER_SERVICE
        );
        self.take_lease().await?;
        self.record(SyncRole::Leader, Some(self.hostname.clone()));
        Ok(true)
    }

    async fn take_lease(&self) -> Result<()> {
        let ttl = CheckTtl::for_lease(self.election_cycle)?;

        tracing::warn!("Setting up master service...");
        self.registry
            .advertise(&ServiceRegistration {
                name: SYNC_MASTER_SERVICE.to_string(),
                id: Pool::Sync.service_id(MASTER_SERVICE),
                address: self.address.clone(),
                port: self.sync_port,
                tags: vec![MASTER_SERVICE.to_string()],
            })
            .await?;

        tracing::warn!("Setting up a health check, ttl {:?}...", ttl.as_duration());
        self.registry
            .create_health_check(
                &format!("Sync Master Health Check for \"{}\"", self.hostname),
                Pool::Sync,
                MASTER_SERVICE,
                ttl,
                &format!(
                    "Sync servers hold an election every {}s. They are unhealthy after missing 2 elections",
                    self.election_cycle.as_secs()
                ),
            )
            .await?;
        self.registry
            .reset_health_check(Pool::Sync, MASTER_SERVICE)
            .await
    }
}
