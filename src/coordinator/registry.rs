//! Host registry
//!
//! Cluster membership, per-host load, quotas, service advertisement, TTL
//! health checks and assignment mutations, all as single-key operations on
//! the coordination store. Nothing here is transactional; every method is
//! safe to repeat.

use crate::common::{format_bytes, Result};
use crate::consul::{
    CatalogEntry, CheckRegistration, CoordinationClient, HealthCheck, ServiceRegistration,
};
use crate::coordinator::segment::{parse_bytes, Assignment, Segment};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Service namespace shared by every registration and check id
pub const SERVICE_NAMESPACE: &str = "segmentd";
pub const READ_NODES_SERVICE: &str = "segmentd-read-nodes";
pub const WRITE_NODES_SERVICE: &str = "segmentd-write-nodes";
pub const READ_SEGMENTS_SERVICE: &str = "segmentd-read-segments";
pub const SYNC_MASTER_SERVICE: &str = "segmentd-sync-master";

/// A host whose load ratio is this far below the fleet average is underloaded
pub const UNDERLOAD_THRESHOLD: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostRole {
    Read,
    Write,
}

impl HostRole {
    pub fn service_name(&self) -> &'static str {
        match self {
            HostRole::Read => READ_NODES_SERVICE,
            HostRole::Write => WRITE_NODES_SERVICE,
        }
    }
}

/// Health check pools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    /// One check per host
    Nodes,
    /// One check per locally served segment
    Read,
    /// The sync master lease
    Sync,
}

impl Pool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pool::Nodes => "nodes",
            Pool::Read => "read",
            Pool::Sync => "sync",
        }
    }

    /// `segmentd/<pool>/<service>`
    pub fn service_id(&self, service: &str) -> String {
        format!("{}/{}/{}", SERVICE_NAMESPACE, self.as_str(), service)
    }

    /// `service:segmentd/<pool>/<service>`
    pub fn check_id(&self, service: &str) -> String {
        format!("service:{}", self.service_id(service))
    }
}

/// TTL of a health check. Always longer than the cycle that resets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckTtl(Duration);

impl CheckTtl {
    pub fn new(ttl: Duration, cycle: Duration) -> Result<Self> {
        if cycle.is_zero() || ttl <= cycle {
            return Err(crate::Error::InvalidConfig(format!(
                "health check ttl {:?} must exceed its reset cycle {:?}",
                ttl, cycle
            )));
        }
        Ok(Self(ttl))
    }

    /// `(cycle + elapsed) * 2`, for checks reset once per sync pass
    pub fn for_pass(cycle: Duration, elapsed: Duration) -> Result<Self> {
        Self::new((cycle + elapsed) * 2, cycle)
    }

    /// Three election cycles: the master survives missing two elections
    pub fn for_lease(election_cycle: Duration) -> Result<Self> {
        Self::new(election_cycle * 3, election_cycle)
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

/// Storage budget and usage of one host. Computed each cycle, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub node: String,
    /// Quota
    pub total_bytes: u64,
    /// Sum of this host's assignment values
    pub assigned_bytes: u64,
}

impl HostRecord {
    pub fn new(node: impl Into<String>, total_bytes: u64, assigned_bytes: u64) -> Self {
        Self {
            node: node.into(),
            total_bytes,
            assigned_bytes,
        }
    }

    /// Negative once a host is assigned more than its quota
    pub fn remaining_bytes(&self) -> i64 {
        self.total_bytes as i64 - self.assigned_bytes as i64
    }

    /// Fraction of the quota in use; 0 when no quota is published
    pub fn load_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.assigned_bytes as f64 / self.total_bytes as f64
    }

    pub fn add_assignment(&mut self, bytes: u64) {
        self.assigned_bytes = self.assigned_bytes.saturating_add(bytes);
    }

    pub fn remove_assignment(&mut self, bytes: u64) {
        self.assigned_bytes = self.assigned_bytes.saturating_sub(bytes);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnderloadedHost {
    pub host: HostRecord,
    pub average_load_ratio: f64,
}

/// Average load ratio of `hosts`. Fails rather than dividing by zero.
pub fn average_load_ratio(hosts: &[HostRecord]) -> Result<f64> {
    if hosts.is_empty() {
        return Err(crate::Error::NoHosts);
    }
    Ok(hosts.iter().map(HostRecord::load_ratio).sum::<f64>() / hosts.len() as f64)
}

/// Hosts whose load ratio is more than [`UNDERLOAD_THRESHOLD`] below the average
pub fn find_underloaded(hosts: Vec<HostRecord>) -> Result<Vec<UnderloadedHost>> {
    let average = average_load_ratio(&hosts)?;
    Ok(hosts
        .into_iter()
        .filter(|host| host.load_ratio() < average - UNDERLOAD_THRESHOLD)
        .map(|host| UnderloadedHost {
            host,
            average_load_ratio: average,
        })
        .collect())
}

/// Hosts and claims read at the start of a master pass
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub hosts: Vec<HostRecord>,
    pub assignments: HashMap<String, Vec<Assignment>>,
}

impl ClusterSnapshot {
    pub fn copies(&self, segment_id: &str) -> &[Assignment] {
        self.assignments
            .get(segment_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn host_mut(&mut self, node: &str) -> Option<&mut HostRecord> {
        self.hosts.iter_mut().find(|h| h.node == node)
    }
}

#[derive(Clone)]
pub struct HostRegistry {
    client: Arc<dyn CoordinationClient>,
}

impl HostRegistry {
    pub fn new(client: Arc<dyn CoordinationClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<dyn CoordinationClient> {
        &self.client
    }

    // === Membership ===

    /// Registered hosts of `role`, one entry per node
    pub async fn hosts(&self, role: HostRole) -> Result<Vec<CatalogEntry>> {
        let mut entries = self.client.catalog_service(role.service_name()).await?;
        let mut seen = std::collections::HashSet::new();
        entries.retain(|entry| seen.insert(entry.node.clone()));
        Ok(entries)
    }

    pub async fn look_for_hosts(&self) -> Result<bool> {
        let found = !self.hosts(HostRole::Read).await?.is_empty()
            || !self.hosts(HostRole::Write).await?.is_empty();
        tracing::debug!("Looking for hosts. Found: {}", found);
        Ok(found)
    }

    pub async fn host_is_advertised(&self, host: &str) -> Result<bool> {
        tracing::info!("Checking if \"{}\" is advertised", host);
        let advertised = self
            .hosts(HostRole::Read)
            .await?
            .iter()
            .any(|entry| entry.node == host);
        if advertised {
            tracing::info!("Found that \"{}\" is advertised", host);
        }
        Ok(advertised)
    }

    // === Load and quota ===

    pub async fn quota(&self, host: &str) -> Result<u64> {
        match self.client.kv_get(host).await? {
            Some(record) => parse_bytes(&record.value),
            None => Ok(0),
        }
    }

    pub async fn set_quota(&self, host: &str, quota: u64) -> Result<()> {
        tracing::info!(
            "Setting quota for host \"{}\": {} bytes ({})",
            host,
            quota,
            format_bytes(quota)
        );
        self.client.kv_put(host, &quota.to_string()).await
    }

    /// Load of every read host
    pub async fn host_load(&self) -> Result<Vec<HostRecord>> {
        Ok(self.snapshot().await?.hosts)
    }

    pub async fn underloaded_hosts(&self) -> Result<Vec<UnderloadedHost>> {
        find_underloaded(self.host_load().await?)
    }

    /// Load of every read host plus all their claims, grouped by segment id
    pub async fn snapshot(&self) -> Result<ClusterSnapshot> {
        let mut snapshot = ClusterSnapshot::default();
        for host in self.hosts(HostRole::Read).await? {
            let assignments = self.assignments_for_host(&host.node).await?;
            let assigned_bytes = assignments.iter().map(|a| a.size_bytes).sum();
            let total_bytes = self.quota(&host.node).await?;
            snapshot
                .hosts
                .push(HostRecord::new(host.node, total_bytes, assigned_bytes));
            for assignment in assignments {
                snapshot
                    .assignments
                    .entry(assignment.segment_id.clone())
                    .or_default()
                    .push(assignment);
            }
        }
        Ok(snapshot)
    }

    // === Advertisement and health checks ===

    pub async fn advertise(&self, service: &ServiceRegistration) -> Result<()> {
        tracing::info!(
            "Advertising: name[{}] service_id[{}] on {}:{} tags {:?}",
            service.name,
            service.id,
            service.address,
            service.port,
            service.tags
        );
        self.client.register_service(service).await
    }

    pub async fn health_check(&self, pool: Pool, service: &str) -> Result<Option<HealthCheck>> {
        self.client.health_check(&pool.check_id(service)).await
    }

    pub async fn create_health_check(
        &self,
        name: &str,
        pool: Pool,
        service: &str,
        ttl: CheckTtl,
        notes: &str,
    ) -> Result<()> {
        tracing::info!(
            "Creating health check {} with ttl {:?}",
            pool.check_id(service),
            ttl.as_duration()
        );
        self.client
            .register_check(&CheckRegistration {
                id: pool.check_id(service),
                name: name.to_string(),
                ttl: ttl.as_duration(),
                notes: notes.to_string(),
                service_id: Some(pool.service_id(service)),
            })
            .await
    }

    pub async fn reset_health_check(&self, pool: Pool, service: &str) -> Result<()> {
        tracing::debug!(
            "Updating health check for pool: \"{}\", service_name: \"{}\"",
            pool.as_str(),
            service
        );
        self.client.ttl_pass(&pool.check_id(service)).await
    }

    // === Assignments ===

    pub async fn assign(&self, host: &str, segment: &Segment) -> Result<()> {
        let key = segment.host_key(host);
        tracing::info!("Assigning segment {} to '{}'", segment.id, host);
        tracing::debug!("Setting key \"{}\" to \"{}\"", key, segment.size_bytes());
        self.client
            .kv_put(&key, &segment.size_bytes().to_string())
            .await
    }

    pub async fn unassign(&self, host: &str, segment: &Segment) -> Result<()> {
        tracing::info!("Unassigning segment {} on '{}'", segment.id, host);
        self.client.kv_delete(&segment.host_key(host)).await
    }

    pub async fn is_assigned_to_host(&self, segment: &Segment, host: &str) -> Result<bool> {
        Ok(self.client.kv_get(&segment.host_key(host)).await?.is_some())
    }

    /// Claims of `host`. Records under `<host>/` that are not claims are skipped.
    pub async fn assignments_for_host(&self, host: &str) -> Result<Vec<Assignment>> {
        Ok(self
            .client
            .kv_scan(&format!("{}/", host))
            .await?
            .iter()
            .filter_map(|record| match Assignment::from_record(record) {
                Ok(assignment) => Some(assignment),
                Err(e) => {
                    tracing::warn!("Skipping record under {}/: {}", host, e);
                    None
                }
            })
            .collect())
    }

    pub async fn segments_for_host(&self, host: &str) -> Result<Vec<Segment>> {
        let segments: Vec<Segment> = self
            .assignments_for_host(host)
            .await?
            .iter()
            .map(Assignment::segment)
            .collect();
        tracing::info!(
            "Checked for segments assigned to {}: found {} segment(s)",
            host,
            segments.len()
        );
        Ok(segments)
    }

    /// Every claim on `segment` by a read host, up or not
    pub async fn all_copies(&self, segment: &Segment) -> Result<Vec<Assignment>> {
        let mut copies = Vec::new();
        for host in self.hosts(HostRole::Read).await? {
            if let Some(record) = self.client.kv_get(&segment.host_key(&host.node)).await? {
                copies.push(Assignment::from_record(&record)?);
            }
        }
        Ok(copies)
    }

    /// Copies currently advertised as healthy, whether or not a claim exists
    pub async fn up_copies(&self, segment: &Segment) -> Result<Vec<CatalogEntry>> {
        self.client
            .healthy_service(READ_SEGMENTS_SERVICE, Some(&segment.id))
            .await
    }
}
