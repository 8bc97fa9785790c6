use anyhow::Context;
use clap::{Parser, Subcommand};
use quip_core::SystemClock;
use quip_server::{Config, build_components, run_server};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "quip")]
#[command(about = "Ephemeral file and paste sharing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server and the background reaper
    Server {
        /// Path to configuration file
        #[arg(short, long, default_value = "quip.yaml")]
        config: String,
    },
    /// Reclaim expired entries and orphaned blobs once, then exit
    Sweep {
        /// Path to configuration file
        #[arg(short, long, default_value = "quip.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quip=info,quip_core=info,quip_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Server { config } => serve(&config).await,
        Commands::Sweep { config } => sweep(&config).await,
    };

    if let Err(e) = outcome {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn serve(config_path: &str) -> anyhow::Result<()> {
    tracing::info!("Starting Quip server with config: {}", config_path);

    let cfg = Config::load(config_path).context("failed to load config")?;
    tracing::info!(
        "Bind: {}, data dir: {}, max upload: {} bytes",
        cfg.server.bind_addr,
        cfg.storage.data_dir.display(),
        cfg.limits.max_upload_bytes
    );

    run_server(cfg).await.context("server error")?;
    Ok(())
}

async fn sweep(config_path: &str) -> anyhow::Result<()> {
    let cfg = Config::load(config_path).context("failed to load config")?;
    let components =
        build_components(&cfg, Arc::new(SystemClock)).context("failed to open storage")?;

    let stats = components.reaper.run_cycle().await;
    let orphans = components
        .reaper
        .sweep_orphans(cfg.reaper.orphan_grace())
        .await
        .context("orphan sweep failed")?;

    tracing::info!(
        "Sweep finished: {} reclaimed, {} failed, {} orphaned blobs removed",
        stats.reclaimed,
        stats.failed,
        orphans
    );

    if stats.failed > 0 {
        anyhow::bail!("{} entries could not be reclaimed", stats.failed);
    }
    Ok(())
}
