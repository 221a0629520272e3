// key: service-lifecycle -> schema-driven state machine, action -> job translation
//
// A LifecycleSchema is data (states, actions, initialState, terminalStates,
// runningStates); this module is the pure interpreter over it. The job is
// the evidence of an attempted transition, the service status is the
// outcome — they are deliberately coupled only through this module, never
// by a shared in-process lock (DESIGN.md).
use std::collections::HashMap;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::audit;
use crate::error::{AppError, AppResult};
use crate::models::{Identity, Job, JobState, Service, ServiceType, TokenRole};
use crate::pool;
use crate::schema::{self, Actor, Schema, SchemaCtx};
use crate::vault;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub on_error: bool,
    #[serde(default)]
    pub on_error_regexp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleAction {
    pub transitions: Vec<Transition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleSchema {
    pub states: Vec<String>,
    pub actions: HashMap<String, LifecycleAction>,
    pub initial_state: String,
    pub terminal_states: Vec<String>,
    #[serde(default)]
    pub running_states: Vec<String>,
}

impl LifecycleSchema {
    pub fn is_terminal(&self, state: &str) -> bool {
        self.terminal_states.iter().any(|s| s == state)
    }
}

fn actor_for(identity: &Identity) -> Actor {
    match identity.role {
        TokenRole::FulcrumAdmin | TokenRole::Participant => Actor::User,
        TokenRole::Agent => Actor::Agent,
    }
}

fn parse_lifecycle(service_type: &ServiceType) -> AppResult<LifecycleSchema> {
    serde_json::from_value(service_type.lifecycle_schema.clone())
        .map_err(|e| AppError::Internal(format!("malformed lifecycle schema: {e}")))
}

fn parse_property_schema(service_type: &ServiceType) -> AppResult<Schema> {
    serde_json::from_value(service_type.property_schema.clone())
        .map_err(|e| AppError::Internal(format!("malformed property schema: {e}")))
}

async fn load_service_type(pool: &PgPool, id: Uuid) -> AppResult<ServiceType> {
    sqlx::query_as::<_, ServiceType>(
        "SELECT id, name, property_schema, lifecycle_schema, created_at, updated_at \
         FROM service_types WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound)
}

pub async fn load_service(pool: &PgPool, id: Uuid) -> AppResult<Service> {
    sqlx::query_as::<_, Service>(
        "SELECT id, name, service_type_id, agent_id, group_id, consumer_participant_id, status, \
         properties, attributes, agent_instance_data, failed_action, created_at, updated_at \
         FROM services WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound)
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

/// Request shape for `POST /services`.
pub struct CreateServiceRequest {
    pub name: String,
    pub service_type_id: Uuid,
    pub agent_id: Uuid,
    pub group_id: Option<Uuid>,
    pub consumer_participant_id: Option<Uuid>,
    pub attributes: Value,
    pub properties: Value,
    pub priority: i32,
}

/// Creates a service at its lifecycle's initial state and immediately
/// submits the `create` action, matching E1 of the service spec: a Service
/// row plus one Pending Job, atomically.
pub async fn create_service(
    pool: &PgPool,
    identity: &Identity,
    req: CreateServiceRequest,
) -> AppResult<(Service, Job)> {
    let service_type = load_service_type(pool, req.service_type_id).await?;
    let lifecycle = parse_lifecycle(&service_type)?;
    let property_schema = parse_property_schema(&service_type)?;

    let action_def = lifecycle
        .actions
        .get("create")
        .ok_or_else(|| AppError::invalid("action", "service type has no 'create' action"))?;

    if !action_def
        .transitions
        .iter()
        .any(|t| !t.on_error && t.from == lifecycle.initial_state)
    {
        return Err(AppError::invalid(
            "action",
            "'create' action has no transition from the initial state",
        ));
    }

    let agent_row = sqlx::query("SELECT participant_id FROM agents WHERE id = $1")
        .bind(req.agent_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::invalid("agentId", "agent does not exist"))?;
    let provider_participant_id: Uuid = agent_row.get("participant_id");

    let service_id = Uuid::now_v7();
    let ctx = SchemaCtx {
        pool: pool.clone(),
        actor: actor_for(identity),
        service_id,
        agent_id: req.agent_id,
        provider_participant_id: Some(provider_participant_id),
        referring_group_id: req.group_id,
        referring_consumer_participant_id: req.consumer_participant_id,
    };

    let mut tx = pool.begin().await?;

    let final_props = schema::apply_create(&mut tx, &ctx, &property_schema, &req.properties)
        .await
        .map_err(AppError::from_field_errors)?;

    sqlx::query(
        "INSERT INTO services (id, name, service_type_id, agent_id, group_id, consumer_participant_id, \
         status, properties, attributes, agent_instance_data, failed_action) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, '{}', NULL)",
    )
    .bind(service_id)
    .bind(&req.name)
    .bind(req.service_type_id)
    .bind(req.agent_id)
    .bind(req.group_id)
    .bind(req.consumer_participant_id)
    .bind(&lifecycle.initial_state)
    .bind(&final_props)
    .bind(&req.attributes)
    .execute(&mut *tx)
    .await?;

    let job_id = Uuid::now_v7();
    let insert_job = sqlx::query(
        "INSERT INTO jobs (id, service_id, agent_id, action, state, priority, params) \
         VALUES ($1, $2, $3, 'create', 'pending', $4, $5)",
    )
    .bind(job_id)
    .bind(service_id)
    .bind(req.agent_id)
    .bind(req.priority)
    .bind(serde_json::json!({ "properties": final_props }))
    .execute(&mut *tx)
    .await;

    if let Err(e) = insert_job {
        if is_unique_violation(&e) {
            return Err(AppError::Conflict(
                "a job is already pending or processing for this service".into(),
            ));
        }
        return Err(e.into());
    }

    audit::record(
        &mut tx,
        identity,
        "service.created",
        "service",
        service_id,
        serde_json::json!({ "action": "create", "serviceTypeId": req.service_type_id }),
    )
    .await?;

    tx.commit().await?;

    let service = load_service(pool, service_id).await?;
    let job = load_job(pool, job_id).await?;
    Ok((service, job))
}

pub async fn load_job(pool: &PgPool, id: Uuid) -> AppResult<Job> {
    sqlx::query_as::<_, Job>(
        "SELECT id, service_id, agent_id, action, state, priority, params, claimed_at, \
         completed_at, error_message, created_at, updated_at FROM jobs WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound)
}

/// Submits `action` against an existing, non-terminal service. Covers both
/// ordinary action submission and `retry` (which re-submits `failedAction`).
pub async fn submit_action(
    pool: &PgPool,
    identity: &Identity,
    service_id: Uuid,
    action: &str,
    properties_payload: Value,
    priority: i32,
) -> AppResult<(Service, Job)> {
    let service = load_service(pool, service_id).await?;
    let service_type = load_service_type(pool, service.service_type_id).await?;
    let lifecycle = parse_lifecycle(&service_type)?;
    let property_schema = parse_property_schema(&service_type)?;

    if lifecycle.is_terminal(&service.status) {
        return Err(AppError::Conflict("service is in a terminal state".into()));
    }

    let action_def = lifecycle
        .actions
        .get(action)
        .ok_or_else(|| AppError::invalid("action", format!("unknown action '{action}'")))?;

    if !action_def
        .transitions
        .iter()
        .any(|t| !t.on_error && t.from == service.status)
    {
        return Err(AppError::Conflict(format!(
            "action '{action}' has no transition from state '{}'",
            service.status
        )));
    }

    let agent_row = sqlx::query("SELECT participant_id FROM agents WHERE id = $1")
        .bind(service.agent_id)
        .fetch_one(pool)
        .await?;
    let provider_participant_id: Uuid = agent_row.get("participant_id");

    let ctx = SchemaCtx {
        pool: pool.clone(),
        actor: actor_for(identity),
        service_id,
        agent_id: service.agent_id,
        provider_participant_id: Some(provider_participant_id),
        referring_group_id: service.group_id,
        referring_consumer_participant_id: service.consumer_participant_id,
    };

    let mut tx = pool.begin().await?;

    let final_props = if properties_payload.as_object().map(|m| !m.is_empty()).unwrap_or(false) {
        schema::apply_update(&mut tx, &ctx, &property_schema, &service.properties, &properties_payload)
            .await
            .map_err(AppError::from_field_errors)?
    } else {
        service.properties.clone()
    };

    sqlx::query("UPDATE services SET properties = $1, failed_action = NULL, updated_at = now() WHERE id = $2")
        .bind(&final_props)
        .bind(service_id)
        .execute(&mut *tx)
        .await?;

    let job_id = Uuid::now_v7();
    let insert_job = sqlx::query(
        "INSERT INTO jobs (id, service_id, agent_id, action, state, priority, params) \
         VALUES ($1, $2, $3, $4, 'pending', $5, $6)",
    )
    .bind(job_id)
    .bind(service_id)
    .bind(service.agent_id)
    .bind(action)
    .bind(priority)
    .bind(serde_json::json!({ "properties": final_props }))
    .execute(&mut *tx)
    .await;

    if let Err(e) = insert_job {
        if is_unique_violation(&e) {
            return Err(AppError::Conflict(
                "a job is already pending or processing for this service".into(),
            ));
        }
        return Err(e.into());
    }

    audit::record(
        &mut tx,
        identity,
        "service.action.submitted",
        "service",
        service_id,
        serde_json::json!({ "action": action }),
    )
    .await?;

    tx.commit().await?;

    Ok((load_service(pool, service_id).await?, load_job(pool, job_id).await?))
}

pub async fn retry(pool: &PgPool, identity: &Identity, service_id: Uuid) -> AppResult<(Service, Job)> {
    let service = load_service(pool, service_id).await?;
    let action = service
        .failed_action
        .clone()
        .ok_or_else(|| AppError::Conflict("service has no failed action to retry".into()))?;
    submit_action(pool, identity, service_id, &action, Value::Null, 0).await
}

/// Property-only update via `PATCH /services/{id}` (§6: "metadata or
/// property update"). Runs the property schema's Update path exactly like
/// `submit_action` — same immutability/authorizer/validator checks — but
/// emits no job and never moves `status`; `submit_action` remains the only
/// path that does both. Rejected once the service is terminal, same as any
/// other mutation attempt on a terminal service (§4.4).
pub async fn update_properties(
    pool: &PgPool,
    identity: &Identity,
    service_id: Uuid,
    properties_payload: Value,
) -> AppResult<Service> {
    let service = load_service(pool, service_id).await?;
    let service_type = load_service_type(pool, service.service_type_id).await?;
    let lifecycle = parse_lifecycle(&service_type)?;
    let property_schema = parse_property_schema(&service_type)?;

    if lifecycle.is_terminal(&service.status) {
        return Err(AppError::Conflict("service is in a terminal state".into()));
    }

    let agent_row = sqlx::query("SELECT participant_id FROM agents WHERE id = $1")
        .bind(service.agent_id)
        .fetch_one(pool)
        .await?;
    let provider_participant_id: Uuid = agent_row.get("participant_id");

    let ctx = SchemaCtx {
        pool: pool.clone(),
        actor: actor_for(identity),
        service_id,
        agent_id: service.agent_id,
        provider_participant_id: Some(provider_participant_id),
        referring_group_id: service.group_id,
        referring_consumer_participant_id: service.consumer_participant_id,
    };

    let mut tx = pool.begin().await?;

    let final_props =
        schema::apply_update(&mut tx, &ctx, &property_schema, &service.properties, &properties_payload)
            .await
            .map_err(AppError::from_field_errors)?;

    sqlx::query("UPDATE services SET properties = $1, updated_at = now() WHERE id = $2")
        .bind(&final_props)
        .bind(service_id)
        .execute(&mut *tx)
        .await?;

    audit::record(
        &mut tx,
        identity,
        "service.properties.patched",
        "service",
        service_id,
        serde_json::json!({}),
    )
    .await?;

    tx.commit().await?;

    load_service(pool, service_id).await
}

#[derive(Debug, Default, Deserialize)]
pub struct CompletionPayload {
    #[serde(default)]
    pub properties: Option<Value>,
    #[serde(default)]
    pub agent_instance_data: Option<Value>,
    #[serde(default)]
    pub external_id: Option<String>,
}

/// Agent reports success. Applies the action's first matching non-error
/// transition, runs the Agent-actor schema update if a payload was sent,
/// then ephemeral/persistent cleanup as appropriate.
pub async fn report_completed(
    pool: &PgPool,
    agent_identity: &Identity,
    job_id: Uuid,
    payload: CompletionPayload,
) -> AppResult<Job> {
    let agent_id = agent_identity.agent_id().ok_or(AppError::Forbidden)?;
    let job = load_job(pool, job_id).await?;
    if job.agent_id != agent_id {
        return Err(AppError::Forbidden);
    }
    if job.state != JobState::Processing {
        return Err(AppError::Conflict("job is not in Processing state".into()));
    }

    let service = load_service(pool, job.service_id).await?;
    let service_type = load_service_type(pool, service.service_type_id).await?;
    let lifecycle = parse_lifecycle(&service_type)?;
    let property_schema = parse_property_schema(&service_type)?;

    let action_def = lifecycle
        .actions
        .get(job.action.as_str())
        .ok_or_else(|| AppError::Internal(format!("job references unknown action '{}'", job.action)))?;
    let transition = action_def
        .transitions
        .iter()
        .find(|t| !t.on_error && t.from == service.status)
        .ok_or_else(|| {
            AppError::Conflict(format!(
                "no non-error transition for action '{}' from state '{}'",
                job.action, service.status
            ))
        })?;
    let new_status = transition.to.clone();

    let ctx = SchemaCtx {
        pool: pool.clone(),
        actor: Actor::Agent,
        service_id: service.id,
        agent_id: service.agent_id,
        provider_participant_id: None,
        referring_group_id: service.group_id,
        referring_consumer_participant_id: service.consumer_participant_id,
    };

    let mut tx = pool.begin().await?;

    let final_props = if let Some(props) = &payload.properties {
        schema::apply_update(&mut tx, &ctx, &property_schema, &service.properties, props)
            .await
            .map_err(AppError::from_field_errors)?
    } else {
        service.properties.clone()
    };

    let agent_instance_data = payload
        .agent_instance_data
        .clone()
        .unwrap_or_else(|| service.agent_instance_data.clone());

    sqlx::query(
        "UPDATE services SET status = $1, properties = $2, agent_instance_data = $3, updated_at = now() \
         WHERE id = $4",
    )
    .bind(&new_status)
    .bind(&final_props)
    .bind(&agent_instance_data)
    .bind(service.id)
    .execute(&mut *tx)
    .await?;

    let is_terminal = lifecycle.is_terminal(&new_status);
    if is_terminal {
        pool::release_all(&mut tx, service.id).await?;
        vault::delete_persistent(&mut tx, service.id).await;
    }

    sqlx::query(
        "UPDATE jobs SET state = 'completed', completed_at = now(), updated_at = now() WHERE id = $1",
    )
    .bind(job_id)
    .execute(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        agent_identity,
        "service.action.completed",
        "service",
        service.id,
        serde_json::json!({
            "action": job.action,
            "fromStatus": service.status,
            "toStatus": new_status,
            "jobId": job_id,
            "externalId": payload.external_id,
        }),
    )
    .await?;

    tx.commit().await?;

    vault::delete_ephemeral(pool, service.id).await;

    load_job(pool, job_id).await
}

/// Agent reports failure. Regex-routes the error message through the
/// action's `onError` transitions; falls back to the unconditional
/// `onError` transition if present; otherwise leaves the service where it
/// was and records `failedAction` so `retry` can resubmit.
pub async fn report_failed(
    pool: &PgPool,
    agent_identity: &Identity,
    job_id: Uuid,
    error_message: String,
) -> AppResult<Job> {
    let agent_id = agent_identity.agent_id().ok_or(AppError::Forbidden)?;
    let job = load_job(pool, job_id).await?;
    if job.agent_id != agent_id {
        return Err(AppError::Forbidden);
    }
    if job.state != JobState::Processing {
        return Err(AppError::Conflict("job is not in Processing state".into()));
    }

    let service = load_service(pool, job.service_id).await?;
    let service_type = load_service_type(pool, service.service_type_id).await?;
    let lifecycle = parse_lifecycle(&service_type)?;

    let action_def = lifecycle
        .actions
        .get(job.action.as_str())
        .ok_or_else(|| AppError::Internal(format!("job references unknown action '{}'", job.action)))?;

    let routed = route_error(action_def, &service.status, &error_message);

    let mut tx = pool.begin().await?;

    let (new_status, failed_action) = match routed {
        Some(to) => (to, None),
        None => (service.status.clone(), Some(job.action.clone())),
    };

    sqlx::query("UPDATE services SET status = $1, failed_action = $2, updated_at = now() WHERE id = $3")
        .bind(&new_status)
        .bind(&failed_action)
        .bind(service.id)
        .execute(&mut *tx)
        .await?;

    let is_terminal = lifecycle.is_terminal(&new_status);
    if is_terminal {
        pool::release_all(&mut tx, service.id).await?;
        vault::delete_persistent(&mut tx, service.id).await;
    }

    sqlx::query(
        "UPDATE jobs SET state = 'failed', completed_at = now(), error_message = $1, updated_at = now() \
         WHERE id = $2",
    )
    .bind(&error_message)
    .bind(job_id)
    .execute(&mut *tx)
    .await?;

    audit::record(
        &mut tx,
        agent_identity,
        "service.action.failed",
        "service",
        service.id,
        serde_json::json!({
            "action": job.action,
            "errorMessage": error_message,
            "fromStatus": service.status,
            "toStatus": new_status,
            "jobId": job_id,
        }),
    )
    .await?;

    tx.commit().await?;

    vault::delete_ephemeral(pool, service.id).await;

    load_job(pool, job_id).await
}

/// Picks the first `onError` transition from `from_status` whose
/// `onErrorRegexp` matches `error_message`; falls back to the first
/// `onError` transition with no regexp.
fn route_error(action: &LifecycleAction, from_status: &str, error_message: &str) -> Option<String> {
    let candidates: Vec<&Transition> = action
        .transitions
        .iter()
        .filter(|t| t.on_error && t.from == from_status)
        .collect();

    for t in &candidates {
        if let Some(pattern) = &t.on_error_regexp {
            if Regex::new(pattern).map(|re| re.is_match(error_message)).unwrap_or(false) {
                return Some(t.to.clone());
            }
        }
    }
    candidates
        .iter()
        .find(|t| t.on_error_regexp.is_none())
        .map(|t| t.to.clone())
}

/// Also reports a job that timed out (`jobTimeoutInterval` exceeded): the
/// only asynchronous state coercion the queue performs, implemented by the
/// timeout reaper calling straight through `report_failed` with a synthetic
/// agent identity scoped to the job's own agent.
pub async fn force_timeout(pool: &PgPool, job: &Job) -> AppResult<Job> {
    let synthetic = Identity { role: TokenRole::Agent, scope_id: Some(job.agent_id) };
    report_failed(pool, &synthetic, job.id, "timeout".to_string()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(transitions: Vec<Transition>) -> LifecycleAction {
        LifecycleAction { transitions }
    }

    #[test]
    fn route_error_prefers_matching_regex_over_fallback() {
        let a = action(vec![
            Transition { from: "New".into(), to: "Failed".into(), on_error: true, on_error_regexp: Some("quota.*exceeded".into()) },
            Transition { from: "New".into(), to: "Stopped".into(), on_error: true, on_error_regexp: None },
        ]);
        assert_eq!(route_error(&a, "New", "AWS quota exceeded"), Some("Failed".into()));
        assert_eq!(route_error(&a, "New", "network unreachable"), Some("Stopped".into()));
    }

    #[test]
    fn route_error_returns_none_when_nothing_matches() {
        let a = action(vec![Transition { from: "New".into(), to: "Failed".into(), on_error: true, on_error_regexp: Some("quota".into()) }]);
        assert_eq!(route_error(&a, "New", "disk full"), None);
    }
}
