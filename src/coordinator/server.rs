//! Sync master loop

use crate::common::{Result, Settings};
use crate::consul::{check_coordination_health, CoordinationClient};
use crate::coordinator::election::ElectionManager;
use crate::coordinator::placement::{PlacementEngine, PlacementReport};
use crate::coordinator::rebalance::{RebalanceEngine, RebalanceReport};
use crate::coordinator::registry::HostRegistry;
use crate::hdfs::SegmentSource;
use std::sync::Arc;
use std::time::Duration;

/// What one master cycle did
#[derive(Debug)]
pub enum MasterPass {
    /// Another host holds the lease
    NotLeader,
    /// Leader, but no host has joined yet
    WaitingForHosts,
    Synced {
        placement: PlacementReport,
        rebalance: RebalanceReport,
    },
}

pub struct SyncMaster {
    settings: Arc<Settings>,
    registry: HostRegistry,
    election: ElectionManager,
    placement: PlacementEngine,
    rebalance: RebalanceEngine,
    source: Arc<dyn SegmentSource>,
}

impl SyncMaster {
    pub fn new(
        settings: Arc<Settings>,
        client: Arc<dyn CoordinationClient>,
        source: Arc<dyn SegmentSource>,
    ) -> Self {
        let registry = HostRegistry::new(client);
        let election = ElectionManager::new(
            registry.clone(),
            settings.hostname.clone(),
            settings.external_ip.clone(),
            settings.sync_port,
            settings.election_cycle,
        );
        Self {
            placement: PlacementEngine::new(registry.clone()),
            rebalance: RebalanceEngine::new(registry.clone()),
            settings,
            registry,
            election,
            source,
        }
    }

    pub fn election(&self) -> &ElectionManager {
        &self.election
    }

    /// Election, then one placement and one rebalance pass if we lead
    pub async fn run_pass(&self) -> Result<MasterPass> {
        if !self.election.hold_election().await? {
            return Ok(MasterPass::NotLeader);
        }
        if !self.registry.look_for_hosts().await? {
            tracing::warn!(
                "Waiting for hosts to join cluster. Sleep period: {:?}",
                self.settings.host_check_wait
            );
            return Ok(MasterPass::WaitingForHosts);
        }

        tracing::info!(
            "Listing segments in {} on {}:{}",
            self.settings.hdfs.path,
            self.settings.hdfs.host,
            self.settings.hdfs.port
        );
        let listing = self.source.list().await?;

        let placement = self.placement.run(&listing).await?;
        let rebalance = self.rebalance.run(&listing).await?;
        Ok(MasterPass::Synced {
            placement,
            rebalance,
        })
    }

    /// Run forever (until ctrl-c)
    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting sync master: {}", self.settings.hostname);
        tracing::info!("  Coordination store: {}", self.settings.consul.base_url());
        tracing::info!("  Segment source: {}", self.settings.hdfs.path);
        tracing::info!("  Election cycle: {:?}", self.settings.election_cycle);

        check_coordination_health(self.registry.client().as_ref()).await?;

        loop {
            let pause = match self.run_pass().await {
                Ok(MasterPass::NotLeader) => self.settings.election_cycle,
                Ok(MasterPass::WaitingForHosts) => self.settings.host_check_wait,
                Ok(MasterPass::Synced {
                    placement,
                    rebalance,
                }) => {
                    tracing::info!(
                        "Sync pass complete: {} assigned, {} unassigned, {} rebalanced",
                        placement.assigned.len(),
                        placement.unassigned.len(),
                        rebalance.assignments()
                    );
                    self.settings.election_cycle
                }
                Err(e) => {
                    tracing::error!("Sync master pass failed: {}", e);
                    self.settings.election_cycle
                }
            };

            if !sleep_or_shutdown(pause).await {
                tracing::info!("Shutting down sync master");
                return Ok(());
            }
        }
    }
}

/// Sleep for `pause`; false if ctrl-c arrived first
pub(crate) async fn sleep_or_shutdown(pause: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(pause) => true,
        _ = tokio::signal::ctrl_c() => false,
    }
}
