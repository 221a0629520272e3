mod agents;
mod api;
mod audit;
mod auth;
mod authorization;
mod config;
mod error;
mod extractor;
mod job_queue;
mod lifecycle;
mod models;
mod pool;
mod routes;
mod schema;
mod vault;
mod workers;

use axum::{routing::get, Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use tokio::sync::watch;
use tracing_subscriber::{fmt, EnvFilter};

use crate::api::health;
use crate::routes::api_routes;

async fn root() -> &'static str {
    "Fulcrum Core"
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = fmt().with_env_filter(EnvFilter::from_default_env());
    if config::LOG_FORMAT.as_str() == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    dotenvy::dotenv().ok();
    // Fail fast if the vault key is missing or malformed.
    let _ = config::VAULT_ENCRYPTION_KEY.as_str();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(config::DB_DSN.as_str())
        .await?;

    sqlx::migrate!().run(&pool).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    workers::spawn_all(pool.clone(), shutdown_rx);

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route("/", get(root))
        .route("/metrics", get(move || async move { metrics_handle.render() }))
        .merge(api_routes())
        .layer(prometheus_layer)
        .layer(Extension(pool.clone()));

    let health_app = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/ready", get(health::ready))
        .layer(Extension(pool));

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::PORT)
        .parse()
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)?;
    let health_addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::HEALTH_PORT)
        .parse()
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)?;

    tracing::info!(%addr, %health_addr, "starting fulcrum-core");

    let health_server = axum::Server::bind(&health_addr).serve(health_app.into_make_service());
    let main_server = axum::Server::bind(&addr).serve(app.into_make_service());

    let result = tokio::try_join!(
        async { main_server.await.map_err(|e| Box::new(e) as Box<dyn std::error::Error>) },
        async { health_server.await.map_err(|e| Box::new(e) as Box<dyn std::error::Error>) },
    );

    let _ = shutdown_tx.send(true);
    result?;

    Ok(())
}
