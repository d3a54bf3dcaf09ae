//! Rebalancing toward underloaded hosts
//!
//! Greedy and order dependent: each underloaded host walks the source
//! listing in order and claims every segment it does not already hold until
//! its load ratio reaches [`TARGET_FRACTION`] of the fleet average. The
//! host's load is tracked in memory during the walk and not re-read from
//! the store.

use crate::common::Result;
use crate::coordinator::registry::HostRegistry;
use crate::coordinator::segment::Segment;
use crate::hdfs::RemoteSegmentFile;
use serde::Serialize;

/// Stop feeding a host once its ratio reaches this fraction of the average
pub const TARGET_FRACTION: f64 = 0.95;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostRebalance {
    pub host: String,
    pub starting_ratio: f64,
    pub final_ratio: f64,
    pub average_load_ratio: f64,
    pub assigned: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct RebalanceReport {
    pub hosts: Vec<HostRebalance>,
}

impl RebalanceReport {
    pub fn assignments(&self) -> usize {
        self.hosts.iter().map(|h| h.assigned.len()).sum()
    }
}

pub struct RebalanceEngine {
    registry: HostRegistry,
}

impl RebalanceEngine {
    pub fn new(registry: HostRegistry) -> Self {
        Self { registry }
    }

    pub async fn run(&self, listing: &[RemoteSegmentFile]) -> Result<RebalanceReport> {
        tracing::info!("Rebalancing hosts...");
        let mut report = RebalanceReport::default();

        for underloaded in self.registry.underloaded_hosts().await? {
            let average = underloaded.average_load_ratio;
            let mut host = underloaded.host;
            if host.total_bytes == 0 {
                tracing::warn!(
                    "Skipping rebalance for {}: no quota published yet",
                    host.node
                );
                continue;
            }

            tracing::info!(
                "Rebalancing {} (its load is {:.1}%, lower than {:.1}%, the average)",
                host.node,
                host.load_ratio() * 100.0,
                average * 100.0
            );
            let mut outcome = HostRebalance {
                host: host.node.clone(),
                starting_ratio: host.load_ratio(),
                final_ratio: host.load_ratio(),
                average_load_ratio: average,
                assigned: Vec::new(),
            };

            for file in listing {
                let segment = Segment::from_remote(file);
                if self
                    .registry
                    .is_assigned_to_host(&segment, &host.node)
                    .await?
                {
                    continue;
                }
                self.registry.assign(&host.node, &segment).await?;
                host.add_assignment(segment.size_bytes());
                outcome.assigned.push(segment.id);
                if host.load_ratio() >= average * TARGET_FRACTION {
                    break;
                }
            }

            outcome.final_ratio = host.load_ratio();
            report.hosts.push(outcome);
        }

        Ok(report)
    }
}
