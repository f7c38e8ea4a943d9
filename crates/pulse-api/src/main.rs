//! Pulse API server entry point.

use std::sync::Arc;

use pulse_aggregate_store::{MemoryAggregateStore, PgAggregateStore};
use pulse_api::config::Settings;
use pulse_api::error::AppError;
use pulse_api::routes;
use pulse_api::state::{AppState, ServiceOptions};
use pulse_api::telemetry;
use pulse_core::clock::{Clock, SystemClock};
use pulse_core::store::{AggregateStore, EventStore};
use pulse_event_store::{MemoryEventStore, PgEventStore};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

type Stores = (Arc<dyn EventStore>, Arc<dyn AggregateStore>);

async fn open_stores(settings: &Settings) -> Result<Stores, AppError> {
    let Some(database_url) = settings.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set, using in-memory stores");
        return Ok((
            Arc::new(MemoryEventStore::new()),
            Arc::new(MemoryAggregateStore::new()),
        ));
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("connected to PostgreSQL, migrations applied");
    Ok((
        Arc::new(PgEventStore::new(pool.clone())),
        Arc::new(PgAggregateStore::new(pool)),
    ))
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::error!(error = %err, "failed to listen for ctrl-c");
            }
            tracing::info!("shutdown requested");
            shutdown.cancel();
        }
        () = shutdown.cancelled() => {}
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let settings = Settings::from_env()?;
    let telemetry = telemetry::init(settings.otlp_endpoint.as_deref())?;

    tracing::info!("Starting Pulse API server");

    let (events, aggregates) = open_stores(&settings).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let shutdown = CancellationToken::new();
    let app_state = AppState::new(
        events,
        aggregates,
        clock,
        ServiceOptions::from(&settings),
        shutdown.clone(),
    );

    match app_state.reconciler.recover_unaggregated().await {
        Ok(report) => tracing::info!(
            batches = report.batches,
            recovered = report.recovered,
            failed = report.failed,
            "startup batch recovery finished"
        ),
        Err(err) => tracing::warn!(
            error = %err,
            "startup batch recovery failed, retrying in background"
        ),
    }

    let jobs = Arc::clone(&app_state.maintenance).spawn(settings.schedule, &shutdown);

    let app = routes::router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr = settings.bind_addr()?;
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await;

    shutdown.cancel();
    for job in jobs {
        if let Err(err) = job.await {
            tracing::error!(error = %err, "maintenance task ended abnormally");
        }
    }
    tracing::info!("Pulse API server stopped");
    telemetry.shutdown();

    served.map_err(AppError::from)
}
