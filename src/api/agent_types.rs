// key: http-agent-types
use axum::extract::{Extension, Path};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::extractor::AuthContext;
use crate::models::AgentType;
use crate::schema::{self, Schema};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentTypeRequest {
    pub name: String,
    pub configuration_schema: Value,
    #[serde(default)]
    pub service_type_ids: Vec<Uuid>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTypeResponse {
    pub id: Uuid,
    pub name: String,
    pub configuration_schema: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<AgentType> for AgentTypeResponse {
    fn from(a: AgentType) -> Self {
        Self {
            id: a.id,
            name: a.name,
            configuration_schema: a.configuration_schema,
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}

pub async fn create(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Json(payload): Json<CreateAgentTypeRequest>,
) -> AppResult<Json<AgentTypeResponse>> {
    if !identity.is_admin() {
        return Err(AppError::Forbidden);
    }

    let schema: Schema = serde_json::from_value(payload.configuration_schema.clone())
        .map_err(|e| AppError::invalid("configurationSchema", e.to_string()))?;
    let errors = schema::validate_structure(&schema);
    if !errors.is_empty() {
        return Err(AppError::InvalidInput(errors));
    }

    let mut tx = pool.begin().await?;
    let agent_type = sqlx::query_as::<_, AgentType>(
        "INSERT INTO agent_types (id, name, configuration_schema) VALUES ($1, $2, $3) \
         RETURNING id, name, configuration_schema, created_at, updated_at",
    )
    .bind(Uuid::now_v7())
    .bind(&payload.name)
    .bind(&payload.configuration_schema)
    .fetch_one(&mut *tx)
    .await?;

    for service_type_id in &payload.service_type_ids {
        sqlx::query(
            "INSERT INTO agent_type_service_types (agent_type_id, service_type_id) VALUES ($1, $2)",
        )
        .bind(agent_type.id)
        .bind(service_type_id)
        .execute(&mut *tx)
        .await?;
    }

    crate::audit::record(
        &mut tx,
        &identity,
        "agent_type.created",
        "agent_type",
        agent_type.id,
        serde_json::json!({ "name": agent_type.name, "serviceTypeIds": payload.service_type_ids }),
    )
    .await?;

    tx.commit().await?;

    Ok(Json(agent_type.into()))
}

pub async fn get(
    Extension(pool): Extension<PgPool>,
    AuthContext(_identity): AuthContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AgentTypeResponse>> {
    let agent_type = sqlx::query_as::<_, AgentType>(
        "SELECT id, name, configuration_schema, created_at, updated_at FROM agent_types WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound)?;
    Ok(Json(agent_type.into()))
}

/// Immutable reference target (§3): refused if any Agent still references it.
pub async fn delete(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Path(id): Path<Uuid>,
) -> AppResult<axum::http::StatusCode> {
    if !identity.is_admin() {
        return Err(AppError::Forbidden);
    }
    let in_use: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM agents WHERE agent_type_id = $1")
        .bind(id)
        .fetch_one(&pool)
        .await?;
    if in_use > 0 {
        return Err(AppError::Conflict("agent type is referenced by existing agents".into()));
    }
    let mut tx = pool.begin().await?;
    let result = sqlx::query("DELETE FROM agent_types WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    crate::audit::record(&mut tx, &identity, "agent_type.deleted", "agent_type", id, serde_json::json!({}))
        .await?;
    tx.commit().await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
