//! Entry point for the webhook delivery service: loads configuration, wires
//! the store/breaker/metrics into an [`webhook_service::AppState`], spawns the
//! delivery worker, and serves the HTTP surface until shutdown.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use webhook_breaker::{CircuitBreaker, CircuitBreakerConfig};
use webhook_common::model::BackoffPolicy;
use webhook_common::{Metrics, Settings};
use webhook_store::{EventStore, MongoEventStore};
use webhook_worker::{DeliveryWorker, WorkerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env().context("loading configuration from environment")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&settings.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("starting webhook delivery service");

    let store: Arc<dyn EventStore> = Arc::new(
        MongoEventStore::connect(&settings.mongodb_uri, &settings.mongodb_database)
            .await
            .context("connecting to MongoDB")?,
    );
    store
        .ensure_indexes()
        .await
        .context("creating MongoDB indexes")?;

    let metrics = Arc::new(Metrics::new());

    let breaker = Arc::new(
        CircuitBreaker::new(
            "downstream",
            CircuitBreakerConfig {
                failure_threshold: settings.circuit_failure_threshold,
                half_open_required_successes: settings.circuit_half_open_required_successes,
                recovery_timeout: Duration::from_secs(settings.circuit_recovery_timeout_seconds),
            },
        )
        .with_metrics(metrics.clone()),
    );

    let settings = Arc::new(settings);

    let worker_config = WorkerConfig {
        poll_interval: Duration::from_secs_f64(settings.worker_poll_interval),
        max_retry_attempts: settings.max_retry_attempts,
        backoff: BackoffPolicy {
            base_delay_seconds: settings.retry_base_delay,
            max_delay_seconds: settings.retry_max_delay,
        },
        downstream_url: settings.downstream_url.clone(),
        downstream_timeout: Duration::from_secs(settings.downstream_timeout_seconds),
    };

    let worker = DeliveryWorker::new(worker_config, store.clone(), breaker.clone(), metrics.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = tokio::spawn(worker.run(shutdown_rx));

    let state = webhook_service::AppState {
        settings: settings.clone(),
        store,
        breaker,
        metrics,
    };
    let app = webhook_service::build_router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("binding HTTP listener on {}", settings.bind_addr))?;
    info!(addr = %settings.bind_addr, "HTTP surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    let _ = shutdown_tx.send(true);
    let _ = worker_handle.await;

    info!("webhook delivery service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
