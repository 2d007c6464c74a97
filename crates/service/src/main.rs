//! GT7 telemetry daemon (gt7d)

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gt7_engineer_service::{AppState, Args, logging, serve};
use gt7_telemetry_config::Gt7Config;
use gt7_telemetry_orchestrator::IngestionService;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_logging(args.verbose)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting gt7d");

    let mut config = Gt7Config::load_from_path(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;
    args.apply_to(&mut config);
    config.validate().context("invalid configuration")?;

    info!(
        source = config.telemetry.source.kind(),
        synthetic = config.telemetry.synthetic.enabled,
        http = %config.server.socket_addr(),
        "Configuration loaded"
    );

    let service = Arc::new(IngestionService::from_settings(config.telemetry.clone()));
    if let Err(e) = service.start().await {
        error!(error = %e, "Live telemetry unavailable, serving synthetic fallback only");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState::new(Arc::clone(&service), shutdown_rx);
    let served = serve(config.server.socket_addr(), state, async move {
        wait_for_shutdown_signal().await;
        if shutdown_tx.send(true).is_err() {
            info!("No open telemetry streams at shutdown");
        }
    })
    .await;

    if let Err(e) = service.stop().await {
        warn!(error = %e, "Live telemetry source did not stop cleanly");
    }
    served?;

    info!("gt7d stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
