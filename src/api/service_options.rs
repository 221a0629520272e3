// key: http-service-options -> provider-enabled values consumed by the `serviceOption` validator
use axum::extract::{Extension, Path};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::authorization::{self, Target};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthContext;
use crate::models::ServiceOption;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServiceOptionRequest {
    pub option_type: String,
    pub value: Value,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOptionResponse {
    pub id: Uuid,
    pub participant_id: Uuid,
    pub option_type: String,
    pub value: Value,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl From<ServiceOption> for ServiceOptionResponse {
    fn from(o: ServiceOption) -> Self {
        Self {
            id: o.id,
            participant_id: o.participant_id,
            option_type: o.option_type,
            value: o.value,
            enabled: o.enabled,
            created_at: o.created_at,
        }
    }
}

/// `POST /participants/{id}/service-options`: the owning provider (or
/// admin) enables one value of `optionType` for the `serviceOption`
/// validator to check membership against.
pub async fn create(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Path(participant_id): Path<Uuid>,
    Json(payload): Json<CreateServiceOptionRequest>,
) -> AppResult<Json<ServiceOptionResponse>> {
    authorization::check(&identity, "create", &Target::Participant { id: participant_id })?;

    let mut tx = pool.begin().await?;
    let option = sqlx::query_as::<_, ServiceOption>(
        "INSERT INTO service_options (id, participant_id, option_type, value, enabled) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING id, participant_id, option_type, value, enabled, created_at",
    )
    .bind(Uuid::now_v7())
    .bind(participant_id)
    .bind(&payload.option_type)
    .bind(&payload.value)
    .bind(payload.enabled)
    .fetch_one(&mut *tx)
    .await?;

    crate::audit::record(
        &mut tx,
        &identity,
        "service_option.created",
        "service_option",
        option.id,
        serde_json::json!({ "optionType": option.option_type, "value": option.value }),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(option.into()))
}

pub async fn list(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Path(participant_id): Path<Uuid>,
) -> AppResult<Json<Vec<ServiceOptionResponse>>> {
    authorization::check(&identity, "read", &Target::Participant { id: participant_id })?;

    let options = sqlx::query_as::<_, ServiceOption>(
        "SELECT id, participant_id, option_type, value, enabled, created_at \
         FROM service_options WHERE participant_id = $1 ORDER BY created_at ASC",
    )
    .bind(participant_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(options.into_iter().map(ServiceOptionResponse::from).collect()))
}

/// Admin or owning provider may disable (not delete) an option; disabling
/// is enough to remove it from future `serviceOption` validation.
pub async fn set_enabled(
    pool: &PgPool,
    identity: &crate::models::Identity,
    id: Uuid,
    enabled: bool,
) -> AppResult<ServiceOptionResponse> {
    let participant_id: Uuid = sqlx::query_scalar("SELECT participant_id FROM service_options WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound)?;
    authorization::check(identity, "update", &Target::Participant { id: participant_id })?;

    let mut tx = pool.begin().await?;
    let option = sqlx::query_as::<_, ServiceOption>(
        "UPDATE service_options SET enabled = $1 WHERE id = $2 \
         RETURNING id, participant_id, option_type, value, enabled, created_at",
    )
    .bind(enabled)
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;
    crate::audit::record(
        &mut tx,
        identity,
        "service_option.enabled_changed",
        "service_option",
        id,
        serde_json::json!({ "enabled": enabled }),
    )
    .await?;
    tx.commit().await?;
    Ok(option.into())
}

pub async fn disable(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ServiceOptionResponse>> {
    Ok(Json(set_enabled(&pool, &identity, id, false).await?))
}
