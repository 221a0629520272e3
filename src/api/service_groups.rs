// key: http-service-groups
use axum::extract::{Extension, Path};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::authorization::{self, Target};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthContext;
use crate::models::ServiceGroup;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServiceGroupRequest {
    pub name: String,
    #[serde(default)]
    pub consumer_participant_id: Option<Uuid>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceGroupResponse {
    pub id: Uuid,
    pub name: String,
    pub consumer_participant_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ServiceGroup> for ServiceGroupResponse {
    fn from(g: ServiceGroup) -> Self {
        Self {
            id: g.id,
            name: g.name,
            consumer_participant_id: g.consumer_participant_id,
            created_at: g.created_at,
            updated_at: g.updated_at,
        }
    }
}

pub async fn create(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Json(payload): Json<CreateServiceGroupRequest>,
) -> AppResult<Json<ServiceGroupResponse>> {
    let consumer_participant_id = if identity.is_admin() {
        payload
            .consumer_participant_id
            .ok_or_else(|| AppError::invalid("consumerParticipantId", "required for admin-issued creates"))?
    } else {
        let Some(pid) = identity.participant_id() else { return Err(AppError::Forbidden) };
        pid
    };

    let mut tx = pool.begin().await?;
    let group = sqlx::query_as::<_, ServiceGroup>(
        "INSERT INTO service_groups (id, name, consumer_participant_id) VALUES ($1, $2, $3) \
         RETURNING id, name, consumer_participant_id, created_at, updated_at",
    )
    .bind(Uuid::now_v7())
    .bind(&payload.name)
    .bind(consumer_participant_id)
    .fetch_one(&mut *tx)
    .await?;

    crate::audit::record(
        &mut tx,
        &identity,
        "service_group.created",
        "service_group",
        group.id,
        serde_json::json!({ "name": group.name, "consumerParticipantId": consumer_participant_id }),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(group.into()))
}

pub async fn get(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ServiceGroupResponse>> {
    let group = sqlx::query_as::<_, ServiceGroup>(
        "SELECT id, name, consumer_participant_id, created_at, updated_at FROM service_groups WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound)?;

    authorization::check(
        &identity,
        "read",
        &Target::Participant { id: group.consumer_participant_id },
    )?;
    Ok(Json(group.into()))
}
