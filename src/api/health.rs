// key: http-health -> served on the second, unauthenticated listener
use axum::extract::Extension;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use sqlx::PgPool;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

/// Liveness only: the process is up and able to answer HTTP.
pub async fn healthz() -> (StatusCode, Json<HealthBody>) {
    (StatusCode::OK, Json(HealthBody { status: "UP" }))
}

/// Readiness: the process additionally holds a working database connection.
pub async fn ready(Extension(pool): Extension<PgPool>) -> (StatusCode, Json<HealthBody>) {
    match sqlx::query("SELECT 1").execute(&pool).await {
        Ok(_) => (StatusCode::OK, Json(HealthBody { status: "UP" })),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, Json(HealthBody { status: "DOWN" }))
        }
    }
}
