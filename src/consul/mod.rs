//! Coordination store interface
//!
//! Everything the sync processes know about each other goes through a
//! Consul-style agent: a key/value store whose records carry a monotonic
//! creation index, a service catalog, and TTL health checks.
//!
//! - [`http::ConsulClient`] talks to a real agent over HTTP
//! - [`memory::MemoryAgent`] is an in-process cluster for tests and
//!   single-box development

pub mod http;
pub mod memory;

pub use http::ConsulClient;
pub use memory::{MemoryAgent, MemoryCluster};

use crate::common::{random_key, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One key/value record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvRecord {
    pub key: String,
    pub value: String,
    /// Assigned by the store when the key is first written. Only meaningful
    /// for ordering records by age.
    pub create_index: u64,
}

/// A service registration as seen through the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub node: String,
    pub address: String,
    pub service_id: String,
    pub service_name: String,
    pub service_port: u16,
    pub tags: Vec<String>,
}

/// Service registration on the local agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub name: String,
    pub id: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
}

/// TTL check registration on the local agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRegistration {
    pub id: String,
    pub name: String,
    pub ttl: Duration,
    pub notes: String,
    /// Service this check gates, if any
    pub service_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passing,
    Warning,
    Critical,
}

impl CheckStatus {
    pub fn is_passing(&self) -> bool {
        matches!(self, CheckStatus::Passing)
    }
}

impl std::str::FromStr for CheckStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "passing" => Ok(CheckStatus::Passing),
            "warning" => Ok(CheckStatus::Warning),
            "critical" => Ok(CheckStatus::Critical),
            other => Err(crate::Error::Coordination(format!(
                "unknown check status: {}",
                other
            ))),
        }
    }
}

/// Current state of a health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub id: String,
    pub name: String,
    pub node: String,
    pub status: CheckStatus,
    pub notes: String,
    pub service_id: Option<String>,
    /// TTL the check was registered with. The Consul agent's check listing
    /// does not report it, so only the in-memory agent fills it in.
    #[serde(default)]
    pub ttl: Option<Duration>,
}

/// Primitive operations the sync processes build on.
///
/// No multi-key transactions: every call is a single linearizable operation,
/// and all multi-step sequences built on top must be safe to re-run.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    async fn kv_get(&self, key: &str) -> Result<Option<KvRecord>>;

    async fn kv_put(&self, key: &str, value: &str) -> Result<()>;

    async fn kv_delete(&self, key: &str) -> Result<()>;

    /// All records whose key starts with `prefix`, ordered by key
    async fn kv_scan(&self, prefix: &str) -> Result<Vec<KvRecord>>;

    /// Every registration of `name`, healthy or not
    async fn catalog_service(&self, name: &str) -> Result<Vec<CatalogEntry>>;

    /// Registrations of `name` whose checks are all passing
    async fn healthy_service(&self, name: &str, tag: Option<&str>) -> Result<Vec<CatalogEntry>>;

    async fn register_service(&self, service: &ServiceRegistration) -> Result<()>;

    async fn register_check(&self, check: &CheckRegistration) -> Result<()>;

    /// Reset a TTL check's countdown and mark it passing
    async fn ttl_pass(&self, check_id: &str) -> Result<()>;

    /// Look up a check registered on the local agent
    async fn health_check(&self, check_id: &str) -> Result<Option<HealthCheck>>;
}

/// Write and delete a random key. Run once at startup: a process that
/// cannot reach the store must not run with stale or absent state.
pub async fn check_coordination_health(client: &dyn CoordinationClient) -> Result<()> {
    let canary = random_key(10);
    tracing::info!(
        "Inserting random key '{}' into the key/value store as a health check",
        canary
    );
    let outcome = async {
        client.kv_put(&canary, "true").await?;
        client.kv_delete(&canary).await
    }
    .await;

    outcome.map_err(|e| {
        crate::Error::CoordinationUnavailable(format!(
            "unable to write canary key '{}': {}",
            canary, e
        ))
    })
}
