// key: http-routes -> one merged router under /api/v1
use axum::routing::{get, patch, post};
use axum::Router;

use crate::api::{
    agent_types, agents, jobs, participants, service_groups, service_options, service_pools,
    service_types, services, vault,
};

pub fn api_routes() -> Router {
    Router::new().nest("/api/v1", v1_routes())
}

fn v1_routes() -> Router {
    Router::new()
        .route("/participants", post(participants::create))
        .route("/participants/:id", get(participants::get))
        .route("/participants/:id/enable", post(participants::enable))
        .route("/participants/:id/disable", post(participants::disable))
        .route(
            "/participants/:id/service-options",
            post(service_options::create).get(service_options::list),
        )
        .route("/service-options/:id/disable", post(service_options::disable))
        .route(
            "/participants/:id/service-pool-sets",
            post(service_pools::create_set),
        )
        .route("/service-pool-sets/:id/pools", post(service_pools::create_pool))
        .route("/service-pools/:id/values", get(service_pools::list_values))
        .route("/agent-types", post(agent_types::create))
        .route("/agent-types/:id", get(agent_types::get).delete(agent_types::delete))
        .route("/agents", post(agents::create))
        .route("/agents/me", get(agents::me))
        .route("/agents/:id/enable", post(agents::enable))
        .route("/agents/:id/disable", post(agents::disable))
        .route("/service-types", post(service_types::create))
        .route("/service-types/:id", get(service_types::get).delete(service_types::delete))
        .route("/service-types/:id/validate", post(service_types::validate))
        .route("/service-groups", post(service_groups::create))
        .route("/service-groups/:id", get(service_groups::get))
        .route("/services", post(services::create))
        .route("/services/:id", get(services::get).patch(patch_service))
        .route("/services/:id/retry", post(services::retry))
        .route("/services/:id/:action", post(services::submit_action))
        .route("/jobs/pending", get(jobs::pending))
        .route("/jobs/:id/claim", post(jobs::claim))
        .route("/jobs/:id/complete", post(jobs::complete))
        .route("/jobs/:id/fail", post(jobs::fail))
        .route("/vault/secrets/:reference", get(vault::get))
        .route("/tokens", post(crate::auth::create_token))
}

async fn patch_service(
    ext: axum::extract::Extension<sqlx::PgPool>,
    auth: crate::extractor::AuthContext,
    path: axum::extract::Path<uuid::Uuid>,
    body: axum::Json<services::PatchServiceRequest>,
) -> crate::error::AppResult<axum::Json<services::ServiceResponse>> {
    services::patch(ext, auth, path, body).await
}
