mod config;
mod db;
mod handlers;
mod models;
mod services;
#[cfg(test)]
mod testing;
mod types;

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use crate::services::retention::RetentionSweeper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ipam=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;

    let state = db::init(&config).await?;

    let sweeper = RetentionSweeper::new(state.jobs.clone(), config.migration_retention_days);
    tokio::spawn(sweeper.start());

    let app = Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/v1/ipam/migrations/validate",
            post(handlers::migration::validate_migration),
        )
        .route(
            "/api/v1/ipam/migrations",
            post(handlers::migration::start_migration).get(handlers::migration::list_migrations),
        )
        .route(
            "/api/v1/ipam/migrations/:migration_id/progress",
            get(handlers::migration::get_progress),
        )
        .route(
            "/api/v1/ipam/migrations/:migration_id/rollback",
            post(handlers::migration::rollback_migration),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting IP pool migration engine on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}
