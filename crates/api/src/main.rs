use std::sync::Arc;

use anyhow::Context;
use mailroom_infra::config::PipelineConfig;
use mailroom_infra::delivery::DeliveryWorker;
use mailroom_observability::LogFormat;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = PipelineConfig::from_env()?;
    mailroom_observability::init_with(config.log_format.parse::<LogFormat>()?);

    let services = Arc::new(mailroom_api::app::services::build_services(&config).await?);

    let workers: Vec<_> = (0..config.worker_count)
        .map(|index| DeliveryWorker::spawn(services.delivery.clone(), config.worker(index)))
        .collect();

    let app = mailroom_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        workers = workers.len(),
        persistent = config.is_persistent(),
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for worker in workers {
        worker.shutdown().await;
    }
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
