//! PIM Worker - main entry point

use anyhow::Result;
use pim_common::logging::{init_logging, LogConfig};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, info_span, Instrument};

use pim_worker::{
    config::Config, health, repository::Repository, storage::Storage, worker::Worker,
};

#[tokio::main]
async fn main() -> Result<()> {
    // NDJSON to stdout by default; LOG_* environment variables override.
    let log_config = LogConfig::from_env().unwrap_or_default();
    init_logging(&log_config)?;

    let config = Config::load().map_err(|e| {
        error!(error = %e, "invalid configuration");
        e
    })?;

    info!(
        worker_id = %config.worker.worker_id,
        "starting player-import ingestion worker"
    );

    let repo = Repository::connect(&config.database).await.map_err(|e| {
        error!(error = %e, "failed to connect to database");
        anyhow::Error::new(e)
    })?;
    info!("database connection pool established");

    let storage = Storage::new(&config.storage);
    info!("storage client initialized");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_span = info_span!("worker", worker_id = %config.worker.worker_id);

    // Health endpoint on its own task; a failed bind is a startup failure.
    let health_listener = health::bind(config.worker.health_port).await?;
    let health_handle = tokio::spawn(
        health::serve(
            health_listener,
            config.worker.worker_id.clone(),
            shutdown_rx.clone(),
        )
        .instrument(worker_span.clone()),
    );

    // Termination and interrupt flip the shutdown flag; the loop observes it
    // at the next iteration boundary.
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(
        async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            let _ = signal_tx.send(true);
        }
        .instrument(worker_span.clone()),
    );

    let worker = Worker::new(config, repo, storage);

    worker.run(shutdown_rx).instrument(worker_span).await?;

    // The loop has exited; stop the health endpoint and drain the pool.
    let _ = shutdown_tx.send(true);
    match health_handle.await {
        Ok(Ok(())) => {},
        Ok(Err(e)) => error!(error = %e, "health endpoint error"),
        Err(e) => error!(error = %e, "health task panicked"),
    }
    worker.close().await;

    info!("worker shut down gracefully");

    Ok(())
}

/// Wait for SIGTERM or Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
