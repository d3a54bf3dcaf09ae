//! Replica placement
//!
//! One pass over every segment in the source listing:
//! - fewer claims than the minimum: claim it on the hosts with the most
//!   remaining bytes that do not hold it yet
//! - more claims and more healthy copies than the minimum: retract the
//!   oldest claim (smallest creation index)
//!
//! Host loads are read once per pass and updated in memory as claims are
//! made, so a batch of new segments spreads across hosts instead of all
//! landing on the host that was emptiest when the pass started.

use crate::common::Result;
use crate::coordinator::registry::{ClusterSnapshot, HostRecord, HostRegistry};
use crate::coordinator::segment::{Assignment, Segment};
use crate::hdfs::RemoteSegmentFile;
use serde::Serialize;

/// One claim created or retracted during a pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacementChange {
    pub segment_id: String,
    pub host: String,
}

#[derive(Debug, Default, Serialize)]
pub struct PlacementReport {
    pub segments_checked: usize,
    pub assigned: Vec<PlacementChange>,
    pub unassigned: Vec<PlacementChange>,
    /// Segments that could not reach the minimum for lack of hosts
    pub short_of_hosts: Vec<String>,
}

impl PlacementReport {
    pub fn is_steady(&self) -> bool {
        self.assigned.is_empty() && self.unassigned.is_empty()
    }
}

/// Index of the host with the largest remaining bytes, skipping `exclude`.
/// Ties go to the host listed first.
pub fn select_emptiest(hosts: &[HostRecord], exclude: &[String]) -> Option<usize> {
    let mut best: Option<(usize, i64)> = None;
    for (idx, host) in hosts.iter().enumerate() {
        if exclude.contains(&host.node) {
            continue;
        }
        let remaining = host.remaining_bytes();
        match best {
            Some((_, top)) if top >= remaining => {}
            _ => best = Some((idx, remaining)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// The claim with the smallest creation index
pub fn oldest_assignment(copies: &[Assignment]) -> Option<&Assignment> {
    copies.iter().min_by_key(|a| a.create_index)
}

pub struct PlacementEngine {
    registry: HostRegistry,
}

impl PlacementEngine {
    pub fn new(registry: HostRegistry) -> Self {
        Self { registry }
    }

    pub async fn run(&self, listing: &[RemoteSegmentFile]) -> Result<PlacementReport> {
        let mut snapshot = self.registry.snapshot().await?;
        if snapshot.hosts.is_empty() {
            return Err(crate::Error::NoHosts);
        }

        let mut report = PlacementReport::default();
        for file in listing {
            let segment = Segment::from_remote(file);
            self.place(&segment, &mut snapshot, &mut report).await?;
            report.segments_checked += 1;
        }

        tracing::info!(
            "Placement pass: {} segment(s), {} assigned, {} unassigned",
            report.segments_checked,
            report.assigned.len(),
            report.unassigned.len()
        );
        Ok(report)
    }

    async fn place(
        &self,
        segment: &Segment,
        snapshot: &mut ClusterSnapshot,
        report: &mut PlacementReport,
    ) -> Result<()> {
        let copies = snapshot.copies(&segment.id).to_vec();
        let minimum = segment.minimum_assignments();

        if copies.len() < minimum {
            let mut holders: Vec<String> = copies.iter().map(|a| a.host.clone()).collect();
            for _ in copies.len()..minimum {
                let Some(idx) = select_emptiest(&snapshot.hosts, &holders) else {
                    tracing::warn!(
                        "{}",
                        crate::Error::InsufficientHosts {
                            segment: segment.id.clone(),
                            needed: minimum,
                            available: holders.len(),
                        }
                    );
                    report.short_of_hosts.push(segment.id.clone());
                    break;
                };
                let host = &mut snapshot.hosts[idx];
                self.registry.assign(&host.node, segment).await?;
                host.add_assignment(segment.size_bytes());
                holders.push(host.node.clone());
                report.assigned.push(PlacementChange {
                    segment_id: segment.id.clone(),
                    host: host.node.clone(),
                });
            }
            return Ok(());
        }

        // A retraction never takes the claim count below the minimum, even
        // while a retracted host still advertises its copy.
        if copies.len() <= minimum {
            return Ok(());
        }
        let up = self.registry.up_copies(segment).await?;
        if up.len() <= minimum {
            return Ok(());
        }

        if let Some(oldest) = oldest_assignment(&copies) {
            tracing::info!(
                "Segment {} has {} up copies; retracting the oldest claim on {} (index {})",
                segment.id,
                up.len(),
                oldest.host,
                oldest.create_index
            );
            self.registry.unassign(&oldest.host, segment).await?;
            if let Some(host) = snapshot.host_mut(&oldest.host) {
                host.remove_assignment(oldest.size_bytes);
            }
            if let Some(claims) = snapshot.assignments.get_mut(&segment.id) {
                claims.retain(|a| a.host != oldest.host);
            }
            report.unassigned.push(PlacementChange {
                segment_id: segment.id.clone(),
                host: oldest.host.clone(),
            });
        }
        Ok(())
    }
}
