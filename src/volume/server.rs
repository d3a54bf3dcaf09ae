//! Host-side servers: the local sync loop and the write API

use crate::common::{Result, Settings};
use crate::consul::{check_coordination_health, CoordinationClient, ServiceRegistration};
use crate::coordinator::registry::{HostRegistry, HostRole, Pool};
use crate::coordinator::server::sleep_or_shutdown;
use crate::hdfs::SegmentSource;
use crate::volume::http::{create_router, WriteState};
use crate::volume::reconciler::LocalReconciler;
use crate::volume::write::WriteAuthorizer;
use std::sync::Arc;

/// Reconciles this host's assignments every `sync_loop_timing`
pub struct LocalSync {
    settings: Arc<Settings>,
    reconciler: LocalReconciler,
}

impl LocalSync {
    pub fn new(
        settings: Arc<Settings>,
        client: Arc<dyn CoordinationClient>,
        source: Arc<dyn SegmentSource>,
    ) -> Self {
        let reconciler = LocalReconciler::new(settings.clone(), HostRegistry::new(client), source);
        Self {
            settings,
            reconciler,
        }
    }

    pub fn reconciler(&self) -> &LocalReconciler {
        &self.reconciler
    }

    pub async fn serve(self) -> Result<()> {
        tracing::info!("Starting local sync: {}", self.settings.hostname);
        tracing::info!("  Coordination store: {}", self.settings.consul.base_url());
        tracing::info!("  Data path: {}", self.settings.local_data.display());
        tracing::info!("  Sync loop: {:?}", self.settings.sync_loop_timing);

        check_coordination_health(self.reconciler.registry().client().as_ref()).await?;
        tokio::fs::create_dir_all(&self.settings.local_data).await?;

        loop {
            if let Err(e) = self.reconciler.run_pass().await {
                tracing::error!("Local sync pass failed: {}", e);
            }
            if !sleep_or_shutdown(self.settings.sync_loop_timing).await {
                tracing::info!("Shutting down local sync");
                return Ok(());
            }
        }
    }
}

/// Serves authorized writes against local segment files
pub struct WriteServer {
    settings: Arc<Settings>,
    registry: HostRegistry,
}

impl WriteServer {
    pub fn new(settings: Arc<Settings>, client: Arc<dyn CoordinationClient>) -> Self {
        Self {
            settings,
            registry: HostRegistry::new(client),
        }
    }

    pub fn state(&self) -> WriteState {
        WriteState {
            settings: self.settings.clone(),
            authorizer: Arc::new(WriteAuthorizer::new(
                self.registry.clone(),
                &self.settings.allowed_write_verbs,
            )),
        }
    }

    pub async fn serve(self) -> Result<()> {
        let bind_addr = format!("0.0.0.0:{}", self.settings.write_port);
        tracing::info!("Starting write server: {}", self.settings.hostname);
        tracing::info!("  HTTP API: {}", bind_addr);
        tracing::info!("  Allowed verbs: {:?}", self.settings.allowed_write_verbs);

        check_coordination_health(self.registry.client().as_ref()).await?;

        // Membership only: write nodes carry no health check
        self.registry
            .advertise(&ServiceRegistration {
                name: HostRole::Write.service_name().to_string(),
                id: format!("{}-write", Pool::Nodes.service_id(&self.settings.hostname)),
                address: self.settings.external_ip.clone(),
                port: self.settings.write_port,
                tags: vec![self.settings.hostname.clone()],
            })
            .await?;

        let router = create_router(self.state());
        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
        tracing::info!("Write server ready");

        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Shutting down write server");
            })
            .await?;
        Ok(())
    }
}
