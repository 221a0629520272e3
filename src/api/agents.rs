// key: http-agents
use axum::extract::{Extension, Path};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::agents as registry;
use crate::auth;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthContext;
use crate::models::{Agent, AgentType, Connectivity, TokenRole};
use crate::schema::{self, Schema, SchemaCtx};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentRequest {
    pub name: String,
    pub agent_type_id: Uuid,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub configuration: Value,
    #[serde(default)]
    pub service_pool_set_id: Option<Uuid>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub id: Uuid,
    pub name: String,
    pub participant_id: Uuid,
    pub agent_type_id: Uuid,
    pub connectivity: Connectivity,
    pub tags: Vec<String>,
    pub configuration: Value,
    pub service_pool_set_id: Option<Uuid>,
    pub last_status_update_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Agent> for AgentResponse {
    fn from(a: Agent) -> Self {
        Self {
            id: a.id,
            name: a.name,
            participant_id: a.participant_id,
            agent_type_id: a.agent_type_id,
            connectivity: a.connectivity,
            tags: a.tags,
            configuration: a.configuration,
            service_pool_set_id: a.service_pool_set_id,
            last_status_update_at: a.last_status_update_at,
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct CreateAgentResponse {
    #[serde(flatten)]
    pub agent: AgentResponse,
    pub token: String,
}

const AGENT_TOKEN_TTL_SECONDS: i64 = 365 * 24 * 3600;

/// `POST /agents`: the caller must be the owning participant (or admin).
/// Configuration is validated against the AgentType's schema before the row
/// is written; the response carries the agent's cleartext bootstrap token,
/// returned exactly once.
pub async fn create(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Json(payload): Json<CreateAgentRequest>,
) -> AppResult<Json<CreateAgentResponse>> {
    let participant_id = if identity.is_admin() {
        return Err(AppError::invalid(
            "participantId",
            "agents must be created by the owning participant, not an admin",
        ));
    } else {
        identity.participant_id().ok_or(AppError::Forbidden)?
    };

    let agent_type = sqlx::query_as::<_, AgentType>(
        "SELECT id, name, configuration_schema, created_at, updated_at FROM agent_types WHERE id = $1",
    )
    .bind(payload.agent_type_id)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| AppError::invalid("agentTypeId", "agent type does not exist"))?;

    let config_schema: Schema = serde_json::from_value(agent_type.configuration_schema.clone())
        .map_err(|e| AppError::Internal(format!("stored configurationSchema is malformed: {e}")))?;

    let agent_id = Uuid::now_v7();
    let ctx = SchemaCtx {
        pool: pool.clone(),
        actor: schema::Actor::User,
        service_id: agent_id,
        agent_id,
        provider_participant_id: Some(participant_id),
        referring_group_id: None,
        referring_consumer_participant_id: None,
    };

    let mut tx = pool.begin().await?;
    let final_config = schema::apply_create(&mut tx, &ctx, &config_schema, &payload.configuration)
        .await
        .map_err(AppError::from_field_errors)?;

    let (token_id, raw_token, _expires_at) = auth::mint_token(
        &mut tx,
        TokenRole::Agent,
        Some(agent_id),
        Duration::seconds(AGENT_TOKEN_TTL_SECONDS),
    )
    .await?;
    let token_hash = crate::extractor::hash_token(&raw_token);

    let agent = sqlx::query_as::<_, Agent>(
        "INSERT INTO agents (id, name, participant_id, agent_type_id, connectivity, token_hash, tags, \
         configuration, service_pool_set_id) \
         VALUES ($1, $2, $3, $4, 'new', $5, $6, $7, $8) \
         RETURNING id, name, participant_id, agent_type_id, connectivity, token_hash, tags, \
         configuration, service_pool_set_id, last_status_update_at, created_at, updated_at",
    )
    .bind(agent_id)
    .bind(&payload.name)
    .bind(participant_id)
    .bind(payload.agent_type_id)
    .bind(&token_hash)
    .bind(&payload.tags)
    .bind(&final_config)
    .bind(payload.service_pool_set_id)
    .fetch_one(&mut *tx)
    .await?;

    crate::audit::record(
        &mut tx,
        &identity,
        "agent.created",
        "agent",
        agent_id,
        serde_json::json!({ "agentTypeId": payload.agent_type_id, "tokenId": token_id }),
    )
    .await?;

    tx.commit().await?;

    Ok(Json(CreateAgentResponse { agent: agent.into(), token: raw_token }))
}

pub async fn me(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
) -> AppResult<Json<AgentResponse>> {
    let agent_id = identity.agent_id().ok_or(AppError::Forbidden)?;
    let agent = sqlx::query_as::<_, Agent>(
        "SELECT id, name, participant_id, agent_type_id, connectivity, token_hash, tags, \
         configuration, service_pool_set_id, last_status_update_at, created_at, updated_at \
         FROM agents WHERE id = $1",
    )
    .bind(agent_id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound)?;
    Ok(Json(agent.into()))
}

pub async fn enable(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AgentResponse>> {
    if !identity.is_admin() {
        return Err(AppError::Forbidden);
    }
    Ok(Json(registry::enable(&pool, &identity, id).await?.into()))
}

pub async fn disable(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AgentResponse>> {
    if !identity.is_admin() {
        return Err(AppError::Forbidden);
    }
    Ok(Json(registry::disable(&pool, &identity, id).await?.into()))
}
