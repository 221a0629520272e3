// key: http-services
use axum::extract::{Extension, Path};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::agents as registry;
use crate::authorization::{self, Target};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthContext;
use crate::lifecycle::{self, CreateServiceRequest as EngineCreateRequest};
use crate::models::{Job, Service};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServiceRequest {
    pub name: String,
    pub service_type_id: Uuid,
    #[serde(default)]
    pub agent_id: Option<Uuid>,
    #[serde(default)]
    pub agent_type_id: Option<Uuid>,
    #[serde(default)]
    pub agent_tags: Vec<String>,
    #[serde(default)]
    pub group_id: Option<Uuid>,
    #[serde(default)]
    pub consumer_participant_id: Option<Uuid>,
    #[serde(default)]
    pub attributes: Value,
    #[serde(default)]
    pub properties: Value,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResponse {
    pub id: Uuid,
    pub name: String,
    pub service_type_id: Uuid,
    pub agent_id: Uuid,
    pub group_id: Option<Uuid>,
    pub consumer_participant_id: Option<Uuid>,
    pub status: String,
    pub properties: Value,
    pub attributes: Value,
    pub agent_instance_data: Value,
    pub failed_action: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Service> for ServiceResponse {
    fn from(s: Service) -> Self {
        Self {
            id: s.id,
            name: s.name,
            service_type_id: s.service_type_id,
            agent_id: s.agent_id,
            group_id: s.group_id,
            consumer_participant_id: s.consumer_participant_id,
            status: s.status,
            properties: s.properties,
            attributes: s.attributes,
            agent_instance_data: s.agent_instance_data,
            failed_action: s.failed_action,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub id: Uuid,
    pub service_id: Uuid,
    pub agent_id: Uuid,
    pub action: String,
    pub state: crate::models::JobState,
    pub priority: i32,
    pub params: Value,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobResponse {
    fn from(j: Job) -> Self {
        Self {
            id: j.id,
            service_id: j.service_id,
            agent_id: j.agent_id,
            action: j.action,
            state: j.state,
            priority: j.priority,
            params: j.params,
            claimed_at: j.claimed_at,
            completed_at: j.completed_at,
            error_message: j.error_message,
            created_at: j.created_at,
            updated_at: j.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct CreateServiceResponse {
    pub service: ServiceResponse,
    pub job: JobResponse,
}

async fn participant_of_agent(pool: &PgPool, agent_id: Uuid) -> AppResult<Uuid> {
    sqlx::query("SELECT participant_id FROM agents WHERE id = $1")
        .bind(agent_id)
        .fetch_optional(pool)
        .await?
        .map(|row| row.get("participant_id"))
        .ok_or_else(|| AppError::invalid("agentId", "agent does not exist"))
}

pub async fn create(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Json(payload): Json<CreateServiceRequest>,
) -> AppResult<Json<CreateServiceResponse>> {
    let agent_id = match (payload.agent_id, payload.agent_type_id) {
        (Some(id), _) => id,
        (None, Some(agent_type_id)) => registry::discover(&pool, agent_type_id, &payload.agent_tags).await?.id,
        (None, None) => {
            return Err(AppError::invalid(
                "agentId",
                "either agentId or agentTypeId+agentTags is required",
            ))
        }
    };

    let agent_participant_id = participant_of_agent(&pool, agent_id).await?;
    authorization::check(
        &identity,
        "create",
        &Target::Service {
            id: Uuid::nil(),
            agent_id,
            agent_participant_id,
            consumer_participant_id: payload.consumer_participant_id,
        },
    )?;

    let (service, job) = lifecycle::create_service(
        &pool,
        &identity,
        EngineCreateRequest {
            name: payload.name,
            service_type_id: payload.service_type_id,
            agent_id,
            group_id: payload.group_id,
            consumer_participant_id: payload.consumer_participant_id,
            attributes: payload.attributes,
            properties: payload.properties,
            priority: payload.priority,
        },
    )
    .await?;

    Ok(Json(CreateServiceResponse { service: service.into(), job: job.into() }))
}

pub async fn get(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ServiceResponse>> {
    let service = lifecycle::load_service(&pool, id).await?;
    let agent_participant_id = participant_of_agent(&pool, service.agent_id).await?;
    authorization::check(
        &identity,
        "read",
        &Target::Service {
            id: service.id,
            agent_id: service.agent_id,
            agent_participant_id,
            consumer_participant_id: service.consumer_participant_id,
        },
    )?;
    Ok(Json(service.into()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitActionRequest {
    #[serde(default)]
    pub properties: Value,
    #[serde(default)]
    pub priority: i32,
}

pub async fn submit_action(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Path((id, action)): Path<(Uuid, String)>,
    Json(payload): Json<SubmitActionRequest>,
) -> AppResult<Json<CreateServiceResponse>> {
    let service = lifecycle::load_service(&pool, id).await?;
    let agent_participant_id = participant_of_agent(&pool, service.agent_id).await?;
    authorization::check(
        &identity,
        "action",
        &Target::Service {
            id: service.id,
            agent_id: service.agent_id,
            agent_participant_id,
            consumer_participant_id: service.consumer_participant_id,
        },
    )?;

    let (service, job) =
        lifecycle::submit_action(&pool, &identity, id, &action, payload.properties, payload.priority).await?;
    Ok(Json(CreateServiceResponse { service: service.into(), job: job.into() }))
}

pub async fn retry(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<CreateServiceResponse>> {
    let service = lifecycle::load_service(&pool, id).await?;
    let agent_participant_id = participant_of_agent(&pool, service.agent_id).await?;
    authorization::check(
        &identity,
        "action",
        &Target::Service {
            id: service.id,
            agent_id: service.agent_id,
            agent_participant_id,
            consumer_participant_id: service.consumer_participant_id,
        },
    )?;

    let (service, job) = lifecycle::retry(&pool, &identity, id).await?;
    Ok(Json(CreateServiceResponse { service: service.into(), job: job.into() }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchServiceRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub properties: Value,
}

/// `PATCH /services/{id}`: metadata rename and/or a property-only update
/// (§6: "metadata or property update"). A `properties` payload runs through
/// `lifecycle::update_properties` — the same Schema Engine Update path
/// action submission uses — but emits no job and never moves `status`;
/// submitting an action is still the only path that does both.
pub async fn patch(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Path(id): Path<Uuid>,
    Json(payload): Json<PatchServiceRequest>,
) -> AppResult<Json<ServiceResponse>> {
    let service = lifecycle::load_service(&pool, id).await?;
    let agent_participant_id = participant_of_agent(&pool, service.agent_id).await?;
    authorization::check(
        &identity,
        "update",
        &Target::Service {
            id: service.id,
            agent_id: service.agent_id,
            agent_participant_id,
            consumer_participant_id: service.consumer_participant_id,
        },
    )?;

    if let Some(name) = payload.name {
        let mut tx = pool.begin().await?;
        sqlx::query("UPDATE services SET name = $1, updated_at = now() WHERE id = $2")
            .bind(&name)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        crate::audit::record(&mut tx, &identity, "service.renamed", "service", id, serde_json::json!({ "name": name }))
            .await?;
        tx.commit().await?;
    }

    if payload.properties.as_object().map(|m| !m.is_empty()).unwrap_or(false) {
        lifecycle::update_properties(&pool, &identity, id, payload.properties).await?;
    }

    Ok(Json(lifecycle::load_service(&pool, id).await?.into()))
}
