//! Local reconciliation pass
//!
//! Every host, every cycle:
//! 1. advertise itself as a read node if it is not already
//! 2. reset its node check if one exists
//! 3. publish its quota
//! 4. for each segment assigned to it: verify the local copy against the
//!    source listing, copy it down again on mismatch, then advertise the
//!    segment and reset its check
//! 5. create the node check if it did not exist
//!
//! A segment is only advertised after its local copy was verified or freshly
//! copied in the same pass. A failed copy is logged and retried next cycle.

use crate::common::{Result, Settings};
use crate::consul::ServiceRegistration;
use crate::coordinator::registry::{
    CheckTtl, HostRegistry, Pool, READ_NODES_SERVICE, READ_SEGMENTS_SERVICE,
};
use crate::coordinator::segment::Segment;
use crate::hdfs::{RemoteSegmentFile, SegmentSource};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Local copy already matched the source
    pub verified: Vec<String>,
    /// Copied (again) from the source this pass
    pub copied: Vec<String>,
    /// Copy failed; not advertised this pass
    pub failed: Vec<String>,
    pub advertised: Vec<String>,
    pub node_check_created: bool,
}

pub struct LocalReconciler {
    settings: Arc<Settings>,
    registry: HostRegistry,
    source: Arc<dyn SegmentSource>,
}

impl LocalReconciler {
    pub fn new(
        settings: Arc<Settings>,
        registry: HostRegistry,
        source: Arc<dyn SegmentSource>,
    ) -> Self {
        Self {
            settings,
            registry,
            source,
        }
    }

    pub fn registry(&self) -> &HostRegistry {
        &self.registry
    }

    pub async fn run_pass(&self) -> Result<ReconcileReport> {
        let hostname = self.settings.hostname.as_str();
        let mut report = ReconcileReport::default();

        if !self.registry.host_is_advertised(hostname).await? {
            tracing::warn!("I am not advertised. Advertising myself as \"{}\"", hostname);
            self.registry
                .advertise(&ServiceRegistration {
                    name: READ_NODES_SERVICE.to_string(),
                    id: Pool::Nodes.service_id(hostname),
                    address: self.settings.external_ip.clone(),
                    port: self.settings.read_port,
                    tags: vec![hostname.to_string()],
                })
                .await?;
        }

        if self
            .registry
            .health_check(Pool::Nodes, hostname)
            .await?
            .is_some()
        {
            self.registry
                .reset_health_check(Pool::Nodes, hostname)
                .await?;
        }

        self.registry
            .set_quota(hostname, self.settings.storage_in_bytes)
            .await?;

        let started = Instant::now();
        let listing: HashMap<String, RemoteSegmentFile> = self
            .source
            .list()
            .await?
            .into_iter()
            .map(|file| (file.segment_id(), file))
            .collect();

        for segment in self.registry.segments_for_host(hostname).await? {
            let exists = self.check_segment_exists(&segment).await;
            let matches = self.check_segment_matches_source(&listing, &segment).await;
            if exists && matches {
                report.verified.push(segment.id.clone());
            } else {
                match self.copy_segment_from_source(&segment).await {
                    Ok(()) => report.copied.push(segment.id.clone()),
                    Err(e) => {
                        tracing::error!("Error copying segment {}: {}", segment.id, e);
                        report.failed.push(segment.id.clone());
                        continue;
                    }
                }
            }

            self.advertise_segment(&segment, started).await?;
            report.advertised.push(segment.id.clone());
        }

        if self
            .registry
            .health_check(Pool::Nodes, hostname)
            .await?
            .is_none()
        {
            let ttl = CheckTtl::for_pass(self.settings.sync_loop_timing, started.elapsed())?;
            self.registry
                .create_health_check(
                    &format!("Node Health Check for \"{}\"", hostname),
                    Pool::Nodes,
                    hostname,
                    ttl,
                    &format!(
                        "Node health checks occur every {}s. They are unhealthy after missing (appx) 2 sync loops",
                        self.settings.sync_loop_timing.as_secs()
                    ),
                )
                .await?;
            self.registry
                .reset_health_check(Pool::Nodes, hostname)
                .await?;
            report.node_check_created = true;
        }

        tracing::info!(
            "Local sync pass: {} verified, {} copied, {} failed",
            report.verified.len(),
            report.copied.len(),
            report.failed.len()
        );
        Ok(report)
    }

    async fn advertise_segment(&self, segment: &Segment, started: Instant) -> Result<()> {
        self.registry
            .advertise(&ServiceRegistration {
                name: READ_SEGMENTS_SERVICE.to_string(),
                id: Pool::Read.service_id(&segment.id),
                address: self.settings.external_ip.clone(),
                port: self.settings.read_port,
                tags: vec![segment.id.clone()],
            })
            .await?;

        if self
            .registry
            .health_check(Pool::Read, &segment.id)
            .await?
            .is_none()
        {
            let ttl = CheckTtl::for_pass(self.settings.sync_loop_timing, started.elapsed())?;
            self.registry
                .create_health_check(
                    &format!("Segment {} Is Healthy", segment.id),
                    Pool::Read,
                    &segment.id,
                    ttl,
                    &format!(
                        "Segment health checks occur every {}s. They are unhealthy after missing (appx) 2 sync loops",
                        self.settings.sync_loop_timing.as_secs()
                    ),
                )
                .await?;
        }

        self.registry
            .reset_health_check(Pool::Read, &segment.id)
            .await
    }

    async fn check_segment_exists(&self, segment: &Segment) -> bool {
        let path = self.settings.segment_path(&segment.id);
        let exists = tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        tracing::debug!(
            "Segment \"{}\" {} on local filesystem at {}",
            segment.id,
            if exists { "exists" } else { "does not exist" },
            path.display()
        );
        exists
    }

    async fn check_segment_matches_source(
        &self,
        listing: &HashMap<String, RemoteSegmentFile>,
        segment: &Segment,
    ) -> bool {
        let Some(remote) = listing.get(&segment.id) else {
            tracing::warn!("Segment {} is not in the source listing", segment.id);
            return false;
        };
        let path = self.settings.segment_path(&segment.id);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.len() == remote.length => true,
            Ok(meta) => {
                tracing::warn!(
                    "Byte counts do not match the source for segment {}: local {}, remote {}",
                    segment.id,
                    meta.len(),
                    remote.length
                );
                false
            }
            Err(_) => false,
        }
    }

    async fn copy_segment_from_source(&self, segment: &Segment) -> Result<()> {
        let source_path = self.source.segment_path(&segment.id);
        tracing::info!(
            "Copying segment {} from {} to {}",
            segment.id,
            source_path,
            self.settings.local_data.display()
        );
        let outcomes = self
            .source
            .copy_to_local(&[source_path], &self.settings.local_data)
            .await?;

        for outcome in outcomes {
            match outcome.error {
                Some(reason) => {
                    return Err(crate::Error::CopyFailed {
                        path: outcome.path,
                        reason,
                    })
                }
                None => tracing::info!("Copied {}", outcome.path),
            }
        }
        Ok(())
    }
}
