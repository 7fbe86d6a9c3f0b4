//! Coordinator process entry point: binds the transport front-end,
//! recovers in-flight sagas from disk, then drains a batch of orders
//! through the saga orchestrator before shutting down cleanly.

use std::sync::Arc;
use std::time::Duration;

use marketplace_coordinator::{load_orders, CoordinatorConfig, OrderPipeline};
use marketplace_runtime::MetricsServer;
use marketplace_saga::{recover_all, FileSagaStore, SagaEnvironment, SagaStore};
use marketplace_transport::{RequestSender, TransportBroker};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CoordinatorConfig::from_env();
    tracing::info!(marketplace_id = %config.marketplace_id, router_addr = %config.router_addr, "starting coordinator process");

    let metrics = match MetricsServer::install(config.metrics_addr) {
        Ok(metrics) => metrics,
        Err(error) => {
            tracing::error!(%error, "failed to install metrics recorder");
            return std::process::ExitCode::FAILURE;
        }
    };
    let metrics_task = tokio::spawn(metrics.serve());

    let saga_store = match FileSagaStore::open(config.saga_state_directory.clone()).await {
        Ok(store) => Arc::new(store),
        Err(error) => {
            tracing::error!(%error, directory = %config.saga_state_directory, "failed to open saga state directory");
            return std::process::ExitCode::FAILURE;
        }
    };

    let own_identity = marketplace_core::SellerId::from(config.marketplace_id.to_string());
    let broker = Arc::new(TransportBroker::new(own_identity));
    let accept_broker = Arc::clone(&broker);
    let router_addr = config.router_addr;
    let mut accept_task = tokio::spawn(async move { accept_broker.run(router_addr).await });
    tokio::select! {
        result = &mut accept_task => {
            tracing::error!(?result, "transport front-end exited during startup");
            return std::process::ExitCode::FAILURE;
        }
        () = tokio::time::sleep(Duration::from_millis(100)) => {}
    }

    let sender: Arc<dyn RequestSender> = Arc::clone(&broker) as Arc<dyn RequestSender>;
    let store: Arc<dyn SagaStore> = Arc::clone(&saga_store) as Arc<dyn SagaStore>;
    let env = SagaEnvironment::new(
        sender,
        config.breaker_config.clone(),
        config.retry_policy.clone(),
        store,
        config.request_timeout,
        config.phase_timeout,
    );

    match recover_all(&env).await {
        Ok(recovered) => {
            if !recovered.is_empty() {
                tracing::info!(count = recovered.len(), "recovered in-flight sagas from disk");
            }
        }
        Err(error) => {
            tracing::warn!(%error, "saga recovery encountered an error; continuing with whatever snapshots loaded");
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let flush_task = marketplace_saga::store::spawn_periodic_flush(
        Arc::clone(&saga_store),
        config.saga_flush_interval,
        shutdown_rx.clone(),
    );

    let orders = match load_orders(config.order_input_path.as_deref()).await {
        Ok(orders) => orders,
        Err(error) => {
            tracing::error!(%error, "failed to load order input");
            return std::process::ExitCode::FAILURE;
        }
    };
    tracing::info!(count = orders.len(), "loaded orders, submitting to the pipeline");

    let pipeline = Arc::new(OrderPipeline::new(env, config.saga_timeout, config.saga_processing_threads, config.order_delay));
    let (report_tx, mut report_rx) = mpsc::unbounded_channel();
    let report_task = tokio::spawn(async move {
        let mut completed = 0usize;
        let mut cancelled = 0usize;
        let mut failed = 0usize;
        while let Some(report) = report_rx.recv().await {
            match report.outcome {
                marketplace_coordinator::OrderOutcome::Completed => completed += 1,
                marketplace_coordinator::OrderOutcome::Cancelled => cancelled += 1,
                marketplace_coordinator::OrderOutcome::Failed => failed += 1,
            }
        }
        (completed, cancelled, failed)
    });

    let grace = config.shutdown_grace;
    let pipeline_for_run = Arc::clone(&pipeline);
    let shutdown_rx_for_run = shutdown_rx.clone();
    let pipeline_task =
        tokio::spawn(async move { pipeline_for_run.run(orders, report_tx, shutdown_rx_for_run, grace).await });

    let mut pipeline_task = pipeline_task;
    tokio::select! {
        result = &mut accept_task => {
            tracing::warn!(?result, "transport front-end exited unexpectedly");
            let _ = shutdown_tx.send(true);
            if let Err(error) = (&mut pipeline_task).await {
                tracing::warn!(%error, "order pipeline task panicked");
            }
        }
        result = wait_for_shutdown_signal() => {
            if let Err(error) = result {
                tracing::error!(%error, "failed to install Ctrl+C handler");
            }
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
            if let Err(error) = (&mut pipeline_task).await {
                tracing::warn!(%error, "order pipeline task panicked");
            }
        }
        result = &mut pipeline_task => {
            tracing::info!("all orders attempted, shutting down");
            if let Err(error) = result {
                tracing::warn!(%error, "order pipeline task panicked");
            }
            let _ = shutdown_tx.send(true);
        }
    }

    let (completed, cancelled, failed) = report_task.await.unwrap_or((0, 0, 0));
    tracing::info!(completed, cancelled, failed, "order pipeline drained");

    broker.shutdown();
    accept_task.abort();
    flush_task.abort();
    metrics_task.abort();

    if let Err(error) = saga_store.flush_all().await {
        tracing::warn!(%error, "final saga snapshot flush failed");
    }

    tracing::info!("coordinator process shut down cleanly");
    std::process::ExitCode::SUCCESS
}

async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
