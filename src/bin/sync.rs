//! Sync binary: master (`--server`) or local host sync

use clap::Parser;
use segmentd::consul::ConsulClient;
use segmentd::hdfs::WebHdfsClient;
use segmentd::{LocalSync, Settings, SyncMaster, SyncMode};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "segmentd-sync")]
#[command(about = "Run the segmentd sync master or the local sync on a storage host")]
#[command(version = segmentd::VERSION)]
struct Cli {
    /// Run as the sync master candidate instead of the local sync
    #[arg(long)]
    server: bool,

    /// Settings file (TOML). SEGMENTD_* environment variables override it.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mode = if cli.server {
        SyncMode::Master
    } else {
        SyncMode::Local
    };

    let settings = Arc::new(Settings::load(cli.config.as_deref(), mode)?);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let client = Arc::new(ConsulClient::new(&settings.consul)?);
    let source = Arc::new(WebHdfsClient::new(
        &settings.hdfs,
        settings.segment_extension.clone(),
    )?);

    match mode {
        SyncMode::Master => SyncMaster::new(settings, client, source).serve().await?,
        _ => LocalSync::new(settings, client, source).serve().await?,
    }

    Ok(())
}
