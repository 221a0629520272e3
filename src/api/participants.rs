// key: http-participants
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
use crate::models::{Participant, ParticipantStatus};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateParticipantRequest {
    pub name: String,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub attributes: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantResponse {
    pub id: Uuid,
    pub name: String,
    pub status: ParticipantStatus,
    pub country_code: Option<String>,
    pub attributes: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Participant> for ParticipantResponse {
    fn from(p: Participant) -> Self {
        Self {
            id: p.id,
            name: p.name,
            status: p.status,
            country_code: p.country_code,
            attributes: p.attributes,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

pub async fn create(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Json(payload): Json<CreateParticipantRequest>,
) -> AppResult<Json<ParticipantResponse>> {
    if !identity.is_admin() {
        return Err(AppError::Forbidden);
    }
    let mut tx = pool.begin().await?;
    let participant = sqlx::query_as::<_, Participant>(
        "INSERT INTO participants (id, name, status, country_code, attributes) \
         VALUES ($1, $2, 'enabled', $3, $4) \
         RETURNING id, name, status, country_code, attributes, created_at, updated_at",
    )
    .bind(Uuid::now_v7())
    .bind(&payload.name)
    .bind(&payload.country_code)
    .bind(&payload.attributes)
    .fetch_one(&mut *tx)
    .await?;
    crate::audit::record(
        &mut tx,
        &identity,
        "participant.created",
        "participant",
        participant.id,
        serde_json::json!({ "name": participant.name }),
    )
    .await?;
    tx.commit().await?;
    Ok(Json(participant.into()))
}

pub async fn get(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ParticipantResponse>> {
    let participant = sqlx::query_as::<_, Participant>(
        "SELECT id, name, status, country_code, attributes, created_at, updated_at \
         FROM participants WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound)?;

    authorization::check(&identity, "read", &Target::Participant { id })?;
    Ok(Json(participant.into()))
}

/// Admin-only status transitions (§3: "state transitions via explicit command").
async fn set_status(
    pool: &PgPool,
    identity: &crate::models::Identity,
    id: Uuid,
    status: ParticipantStatus,
) -> AppResult<ParticipantResponse> {
    if !identity.is_admin() {
        return Err(AppError::Forbidden);
    }
    let mut tx = pool.begin().await?;
    let participant = sqlx::query_as::<_, Participant>(
        "UPDATE participants SET status = $1, updated_at = now() WHERE id = $2 \
         RETURNING id, name, status, country_code, attributes, created_at, updated_at",
    )
    .bind(status)
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound)?;
    crate::audit::record(
        &mut tx,
        identity,
        "participant.status_changed",
        "participant",
        id,
        serde_json::json!({ "status": status }),
    )
    .await?;
    tx.commit().await?;
    Ok(participant.into())
}

pub async fn enable(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ParticipantResponse>> {
    Ok(Json(set_status(&pool, &identity, id, ParticipantStatus::Enabled).await?))
}

pub async fn disable(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ParticipantResponse>> {
    Ok(Json(set_status(&pool, &identity, id, ParticipantStatus::Disabled).await?))
}
