//! In-process coordination store
//!
//! A [`MemoryCluster`] holds the shared state; each host talks to it through
//! its own [`MemoryAgent`], the same way every host runs a local agent.
//! TTL checks expire against `tokio::time::Instant`, so tests can drive
//! expiry with a paused clock.

use super::{
    CatalogEntry, CheckRegistration, CheckStatus, CoordinationClient, HealthCheck, KvRecord,
    ServiceRegistration,
};
use crate::common::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

struct StoredCheck {
    registration: CheckRegistration,
    last_pass: Option<Instant>,
}

impl StoredCheck {
    fn status(&self, now: Instant) -> CheckStatus {
        match self.last_pass {
            Some(at) if now.duration_since(at) < self.registration.ttl => CheckStatus::Passing,
            _ => CheckStatus::Critical,
        }
    }
}

struct ClusterState {
    available: bool,
    next_index: u64,
    kv: BTreeMap<String, KvRecord>,
    /// (node, service id) -> registration
    services: BTreeMap<(String, String), ServiceRegistration>,
    /// (node, check id) -> check
    checks: BTreeMap<(String, String), StoredCheck>,
}

/// Shared state of an in-memory cluster
pub struct MemoryCluster {
    state: Mutex<ClusterState>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClusterState {
                available: true,
                next_index: 1,
                kv: BTreeMap::new(),
                services: BTreeMap::new(),
                checks: BTreeMap::new(),
            }),
        }
    }

    /// Simulate the store going away (or coming back)
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    fn lock(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reachable(&self) -> Result<MutexGuard<'_, ClusterState>> {
        let state = self.lock();
        if !state.available {
            return Err(crate::Error::CoordinationUnavailable(
                "in-memory cluster is offline".into(),
            ));
        }
        Ok(state)
    }
}

/// One host's view of a [`MemoryCluster`]
#[derive(Clone)]
pub struct MemoryAgent {
    node: String,
    cluster: Arc<MemoryCluster>,
}

impl MemoryAgent {
    pub fn new(node: impl Into<String>, cluster: Arc<MemoryCluster>) -> Self {
        Self {
            node: node.into(),
            cluster,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }
}

fn entry_for(node: &str, service: &ServiceRegistration) -> CatalogEntry {
    CatalogEntry {
        node: node.to_string(),
        address: service.address.clone(),
        service_id: service.id.clone(),
        service_name: service.name.clone(),
        service_port: service.port,
        tags: service.tags.clone(),
    }
}

#[async_trait]
impl CoordinationClient for MemoryAgent {
    async fn kv_get(&self, key: &str) -> Result<Option<KvRecord>> {
        let state = self.cluster.reachable()?;
        Ok(state.kv.get(key).cloned())
    }

    async fn kv_put(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.cluster.reachable()?;
        let index = state.next_index;
        state.next_index += 1;
        state
            .kv
            .entry(key.to_string())
            .and_modify(|record| record.value = value.to_string())
            .or_insert_with(|| KvRecord {
                key: key.to_string(),
                value: value.to_string(),
                create_index: index,
            });
        Ok(())
    }

    async fn kv_delete(&self, key: &str) -> Result<()> {
        let mut state = self.cluster.reachable()?;
        state.kv.remove(key);
        Ok(())
    }

    async fn kv_scan(&self, prefix: &str) -> Result<Vec<KvRecord>> {
        let state = self.cluster.reachable()?;
        Ok(state
            .kv
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn catalog_service(&self, name: &str) -> Result<Vec<CatalogEntry>> {
        let state = self.cluster.reachable()?;
        Ok(state
            .services
            .iter()
            .filter(|(_, service)| service.name == name)
            .map(|((node, _), service)| entry_for(node, service))
            .collect())
    }

    async fn healthy_service(&self, name: &str, tag: Option<&str>) -> Result<Vec<CatalogEntry>> {
        let state = self.cluster.reachable()?;
        let now = Instant::now();
        Ok(state
            .services
            .iter()
            .filter(|(_, service)| service.name == name)
            .filter(|(_, service)| tag.map_or(true, |t| service.tags.iter().any(|s| s == t)))
            .filter(|((node, id), _)| {
                state
                    .checks
                    .iter()
                    .filter(|((check_node, _), check)| {
                        check_node == node
                            && check.registration.service_id.as_deref() == Some(id.as_str())
                    })
                    .all(|(_, check)| check.status(now).is_passing())
            })
            .map(|((node, _), service)| entry_for(node, service))
            .collect())
    }

    async fn register_service(&self, service: &ServiceRegistration) -> Result<()> {
        let mut state = self.cluster.reachable()?;
        state
            .services
            .insert((self.node.clone(), service.id.clone()), service.clone());
        Ok(())
    }

    async fn register_check(&self, check: &CheckRegistration) -> Result<()> {
        let mut state = self.cluster.reachable()?;
        // Re-registering resets the check to critical, like a real agent.
        state.checks.insert(
            (self.node.clone(), check.id.clone()),
            StoredCheck {
                registration: check.clone(),
                last_pass: None,
            },
        );
        Ok(())
    }

    async fn ttl_pass(&self, check_id: &str) -> Result<()> {
        let mut state = self.cluster.reachable()?;
        match state
            .checks
            .get_mut(&(self.node.clone(), check_id.to_string()))
        {
            Some(check) => {
                check.last_pass = Some(Instant::now());
                Ok(())
            }
            None => Err(crate::Error::UnknownCheck(check_id.to_string())),
        }
    }

    async fn health_check(&self, check_id: &str) -> Result<Option<HealthCheck>> {
        let state = self.cluster.reachable()?;
        let now = Instant::now();
        Ok(state
            .checks
            .get(&(self.node.clone(), check_id.to_string()))
            .map(|check| HealthCheck {
                id: check.registration.id.clone(),
                name: check.registration.name.clone(),
                node: self.node.clone(),
                status: check.status(now),
                notes: check.registration.notes.clone(),
                service_id: check.registration.service_id.clone(),
                ttl: Some(check.registration.ttl),
            }))
    }
}
