use axum_helpers::server::{create_production_app, create_router};
use core_config::tracing::{init_tracing, install_color_eyre};
use domain_events::{ApiDoc, IngestService, PgEventStore, events_router};
use event_pipeline::{
    DefaultProcessor, EventStore, InMemoryEventStore, MetricsAggregator, Pipeline, RetryPolicy,
    init_metrics,
};
use eyre::WrapErr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

mod config;

use config::Config;

/// Extra time granted to server cleanup beyond the pipeline drain deadline
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Install color-eyre first for colored error output (before any fallible operations)
    install_color_eyre();

    let config = Config::from_env()?;

    // Initialize tracing with ErrorLayer for span trace capture
    init_tracing(&config.environment);

    init_metrics().wrap_err("Failed to install Prometheus recorder")?;

    let store = build_store(&config).await?;

    let pipeline = Pipeline::start(
        config.pipeline.clone(),
        Arc::new(DefaultProcessor::new()),
        store.clone(),
        Arc::new(MetricsAggregator::new()),
    )
    .map_err(|e| eyre::eyre!("Failed to start pipeline: {}", e))?;
    let pipeline = Arc::new(pipeline);

    info!(
        workers = config.pipeline.worker_count,
        queue_capacity = config.pipeline.queue_capacity,
        store = store.name(),
        "Event pipeline started"
    );

    let service = IngestService::new(pipeline.clone(), store, config.app.clone());
    let api_routes = events_router().with_state(service);

    // create_router adds docs/middleware to our composed routes
    let router =
        create_router::<ApiDoc>(api_routes, config.server.cors_allowed_origin.as_deref())?;

    let drain_timeout = config.pipeline.drain_timeout;
    create_production_app(
        router,
        &config.server,
        drain_timeout + SHUTDOWN_GRACE,
        async move {
            info!(?drain_timeout, "Draining event pipeline");
            let report = pipeline.shutdown(drain_timeout).await;
            if report.drained {
                info!(
                    elapsed_ms = report.elapsed_ms,
                    processed = report.metrics.events_processed,
                    failed = report.metrics.events_failed,
                    "Pipeline drained"
                );
            } else {
                warn!(
                    elapsed_ms = report.elapsed_ms,
                    abandoned = report.abandoned,
                    "Pipeline drain deadline reached, remaining events abandoned"
                );
            }
        },
    )
    .await
    .map_err(|e| eyre::eyre!("Server error: {}", e))?;

    info!("{} shutdown complete", config.app.name);
    Ok(())
}

/// PostgreSQL when `DATABASE_URL` is set, otherwise an in-memory store
async fn build_store(config: &Config) -> eyre::Result<Arc<dyn EventStore>> {
    match &config.database {
        Some(database) => {
            let retry = RetryPolicy::new()
                .with_max_attempts(5)
                .with_initial_backoff(Duration::from_millis(500));
            let store = PgEventStore::connect(database, retry)
                .await
                .map_err(|e| eyre::eyre!("PostgreSQL connection failed: {}", e))?;
            store
                .ensure_table()
                .await
                .wrap_err("Failed to create events table")?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set, events are kept in memory only");
            Ok(Arc::new(InMemoryEventStore::new()))
        }
    }
}
