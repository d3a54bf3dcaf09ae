//! Shared fixtures for the cluster tests

#![allow(dead_code)]

use segmentd::common::{ConsulSettings, HdfsSettings, Settings, SyncMode};
use segmentd::consul::{MemoryAgent, MemoryCluster, ServiceRegistration};
use segmentd::coordinator::registry::{
    CheckTtl, HostRegistry, Pool, READ_NODES_SERVICE, READ_SEGMENTS_SERVICE,
};
use segmentd::coordinator::Segment;
use segmentd::hdfs::RemoteSegmentFile;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub fn settings(hostname: &str, mode: SyncMode, local_data: &Path) -> Settings {
    Settings {
        mode,
        hostname: hostname.to_string(),
        external_ip: "10.0.0.1".to_string(),
        consul: ConsulSettings {
            address: "127.0.0.1".to_string(),
            port: 8500,
        },
        hdfs: HdfsSettings {
            host: "namenode".to_string(),
            port: 50070,
            path: "/segments".to_string(),
        },
        election_cycle: Duration::from_secs(10),
        host_check_wait: Duration::from_secs(1),
        sync_port: 6111,
        read_port: 6222,
        write_port: 6333,
        storage_in_bytes: 1_000_000,
        sync_loop_timing: Duration::from_secs(5),
        local_data: local_data.to_path_buf(),
        segment_extension: "sqlite".to_string(),
        allowed_write_verbs: vec!["INSERT".into(), "UPDATE".into(), "DELETE".into()],
        log_level: "debug".to_string(),
    }
}

pub fn registry(cluster: &Arc<MemoryCluster>, node: &str) -> HostRegistry {
    HostRegistry::new(Arc::new(MemoryAgent::new(node, cluster.clone())))
}

/// A read host with a published quota, already holding `assigned` bytes
pub async fn join_host(
    cluster: &Arc<MemoryCluster>,
    node: &str,
    quota: u64,
    assigned: u64,
) -> HostRegistry {
    let registry = registry(cluster, node);
    registry
        .advertise(&ServiceRegistration {
            name: READ_NODES_SERVICE.to_string(),
            id: Pool::Nodes.service_id(node),
            address: "10.0.0.1".to_string(),
            port: 6222,
            tags: vec![node.to_string()],
        })
        .await
        .unwrap();
    registry.set_quota(node, quota).await.unwrap();
    if assigned > 0 {
        let filler = Segment::new(format!("filler-{}", node), Some(assigned));
        registry.assign(node, &filler).await.unwrap();
    }
    registry
}

/// Advertise `segment_id` from the host behind `registry` with a passing check
pub async fn serve_segment(registry: &HostRegistry, segment_id: &str) {
    registry
        .advertise(&ServiceRegistration {
            name: READ_SEGMENTS_SERVICE.to_string(),
            id: Pool::Read.service_id(segment_id),
            address: "10.0.0.1".to_string(),
            port: 6222,
            tags: vec![segment_id.to_string()],
        })
        .await
        .unwrap();
    let ttl = CheckTtl::for_pass(Duration::from_secs(5), Duration::ZERO).unwrap();
    registry
        .create_health_check("segment check", Pool::Read, segment_id, ttl, "")
        .await
        .unwrap();
    registry
        .reset_health_check(Pool::Read, segment_id)
        .await
        .unwrap();
}

pub fn remote(segment_id: &str, length: u64) -> RemoteSegmentFile {
    RemoteSegmentFile {
        path: format!("/segments/{}.sqlite", segment_id),
        length,
    }
}

pub async fn holders(registry: &HostRegistry, segment_id: &str) -> Vec<String> {
    let mut hosts: Vec<String> = registry
        .all_copies(&Segment::new(segment_id, None))
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.host)
        .collect();
    hosts.sort();
    hosts
}
