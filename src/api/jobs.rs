// key: http-jobs
use axum::extract::{Extension, Path};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::extractor::AuthContext;
use crate::job_queue;
use crate::lifecycle::{self, CompletionPayload};

use super::services::JobResponse;

pub async fn pending(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
) -> AppResult<Json<Vec<JobResponse>>> {
    let agent_id = identity.agent_id().ok_or(AppError::Forbidden)?;
    let jobs = job_queue::list_pending(&pool, agent_id).await?;
    Ok(Json(jobs.into_iter().map(JobResponse::from).collect()))
}

pub async fn claim(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<JobResponse>> {
    let agent_id = identity.agent_id().ok_or(AppError::Forbidden)?;
    let job = job_queue::claim(&pool, agent_id, id).await?;
    Ok(Json(job.into()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteJobRequest {
    #[serde(default)]
    pub properties: Option<Value>,
    #[serde(default)]
    pub agent_instance_data: Option<Value>,
    #[serde(default)]
    pub external_id: Option<String>,
}

pub async fn complete(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<CompleteJobRequest>,
) -> AppResult<Json<JobResponse>> {
    let job = lifecycle::report_completed(
        &pool,
        &identity,
        id,
        CompletionPayload {
            properties: payload.properties,
            agent_instance_data: payload.agent_instance_data,
            external_id: payload.external_id,
        },
    )
    .await?;
    Ok(Json(job.into()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailJobRequest {
    pub error_message: String,
}

pub async fn fail(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<FailJobRequest>,
) -> AppResult<Json<JobResponse>> {
    let job = lifecycle::report_failed(&pool, &identity, id, payload.error_message).await?;
    Ok(Json(job.into()))
}
