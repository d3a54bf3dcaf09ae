//! Write API binary

use clap::Parser;
use segmentd::consul::ConsulClient;
use segmentd::{Settings, SyncMode, WriteServer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "segmentd-write")]
#[command(about = "Serve authorized writes against local segment files")]
#[command(version = segmentd::VERSION)]
struct Cli {
    /// Settings file (TOML). SEGMENTD_* environment variables override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides write_port)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref(), SyncMode::Write)?;
    if let Some(port) = cli.port {
        settings.write_port = port;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let client = Arc::new(ConsulClient::new(&settings.consul)?);
    WriteServer::new(Arc::new(settings), client).serve().await?;

    Ok(())
}
