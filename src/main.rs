use std::net::SocketAddr;
use std::sync::Arc;

use courier_dispatch::api;
use courier_dispatch::clock::{Clock, SystemClock};
use courier_dispatch::config::Config;
use courier_dispatch::engine::events::{run_event_processor, OrderEventProcessor};
use courier_dispatch::engine::expiry::run_expiry_loop;
use courier_dispatch::engine::{AssignmentEngine, Dispatcher};
use courier_dispatch::error::AppError;
use courier_dispatch::observability::metrics::Metrics;
use courier_dispatch::ratelimit::RateLimiter;
use courier_dispatch::state::AppState;
use courier_dispatch::storage::{CourierRepository, MemoryRepository, PgCourierRepository};
use courier_dispatch::upstream::{GrpcOrderClient, OrderLookup, RetryingOrderLookup};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    match config.database_url.clone() {
        Some(url) => {
            let repo = PgCourierRepository::connect(&url, config.database_max_connections)
                .await
                .map_err(|err| AppError::Internal(format!("database setup failed: {err}")))?;
            tracing::info!(max_connections = config.database_max_connections, "using postgres store");
            run(config, Arc::new(repo)).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store");
            run(config, Arc::new(MemoryRepository::new())).await
        }
    }
}

async fn run<R: CourierRepository>(config: Config, repo: Arc<R>) -> Result<(), AppError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let metrics = Metrics::new();
    let shutdown = CancellationToken::new();

    let engine = Arc::new(AssignmentEngine::new(
        repo,
        clock.clone(),
        metrics.clone(),
        config.event_buffer_size,
    ));
    let dispatcher: Arc<dyn Dispatcher> = engine.clone();

    let orders = match &config.order_service_url {
        Some(url) => {
            let client = GrpcOrderClient::connect_lazy(url, config.order_service_timeout)
                .map_err(|err| AppError::Internal(format!("invalid ORDER_SERVICE_URL: {err}")))?;
            tracing::info!(url = %url, "order enrichment enabled");
            Some(Arc::new(client) as Arc<dyn OrderLookup>)
        }
        None => None,
    };
    let orders = RetryingOrderLookup::wrap(
        orders,
        config.retry.clone(),
        metrics.upstream_retries_total.clone(),
        clock.clone(),
    )
    .map(|gateway| Arc::new(gateway) as Arc<dyn OrderLookup>);

    let processor = Arc::new(OrderEventProcessor::new(
        dispatcher.clone(),
        orders,
        metrics.clone(),
    ));

    if !config.backfill_window.is_zero() {
        let window = chrono::Duration::from_std(config.backfill_window)
            .map_err(|err| AppError::Internal(format!("invalid BACKFILL_WINDOW_SECS: {err}")))?;
        if let Err(status) = processor.backfill(&shutdown, clock.now_utc() - window).await {
            tracing::warn!(code = ?status.code(), error = %status.message(), "order backfill failed");
        }
    }

    let limiter = RateLimiter::new(config.rate_limit.clone(), clock.clone());
    let (app_state, events_rx) =
        AppState::new(engine, limiter, metrics, config.event_queue_size);
    let app = api::rest::router(Arc::new(app_state));

    let expiry = tokio::spawn(run_expiry_loop(
        dispatcher,
        config.expiry_interval,
        shutdown.clone(),
    ));
    let events = tokio::spawn(run_event_processor(processor, events_rx, shutdown.clone()));

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await
    .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    shutdown.cancel();
    let _ = tokio::join!(expiry, events);
    tracing::info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
        }
        _ = shutdown.cancelled() => {}
    }
    tracing::info!("shutdown signal received");
    shutdown.cancel();
}
