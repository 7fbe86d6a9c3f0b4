//! Seller process entry point: dial the coordinator and serve RESERVE,
//! CONFIRM, and CANCEL requests until shut down.

use marketplace_seller::{SellerConfig, SellerService};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SellerConfig::from_env();
    tracing::info!(seller_id = %config.seller_id, coordinator_addr = %config.coordinator_addr, "starting seller process");

    let service = match SellerService::connect(&config).await {
        Ok(service) => service,
        Err(error) => {
            tracing::error!(%error, "failed to connect to coordinator");
            return std::process::ExitCode::FAILURE;
        }
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let run_handle = tokio::spawn(service.run(config, shutdown_rx));

    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to install Ctrl+C handler");
    }
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    if let Err(error) = run_handle.await {
        tracing::error!(%error, "seller service task panicked");
        return std::process::ExitCode::FAILURE;
    }

    tracing::info!("seller process shut down cleanly");
    std::process::ExitCode::SUCCESS
}
