// key: http-service-types
use axum::extract::{Extension, Path};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult, FieldError};
use crate::extractor::AuthContext;
use crate::lifecycle::LifecycleSchema;
use crate::models::ServiceType;
use crate::schema::{self, Schema};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServiceTypeRequest {
    pub name: String,
    pub property_schema: Value,
    pub lifecycle_schema: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTypeResponse {
    pub id: Uuid,
    pub name: String,
    pub property_schema: Value,
    pub lifecycle_schema: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ServiceType> for ServiceTypeResponse {
    fn from(s: ServiceType) -> Self {
        Self {
            id: s.id,
            name: s.name,
            property_schema: s.property_schema,
            lifecycle_schema: s.lifecycle_schema,
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

fn validate_lifecycle(raw: &Value) -> Result<(), FieldError> {
    let lifecycle: LifecycleSchema = serde_json::from_value(raw.clone())
        .map_err(|e| FieldError::new("lifecycleSchema", e.to_string()))?;
    if !lifecycle.states.iter().any(|s| s == &lifecycle.initial_state) {
        return Err(FieldError::new("lifecycleSchema.initialState", "must be one of states"));
    }
    for t in &lifecycle.terminal_states {
        if !lifecycle.states.iter().any(|s| s == t) {
            return Err(FieldError::new("lifecycleSchema.terminalStates", format!("unknown state '{t}'")));
        }
    }
    for (name, action) in &lifecycle.actions {
        for transition in &action.transitions {
            if !lifecycle.states.iter().any(|s| s == &transition.from) {
                return Err(FieldError::new(
                    format!("lifecycleSchema.actions.{name}"),
                    format!("transition references unknown state '{}'", transition.from),
                ));
            }
            if !lifecycle.states.iter().any(|s| s == &transition.to) {
                return Err(FieldError::new(
                    format!("lifecycleSchema.actions.{name}"),
                    format!("transition references unknown state '{}'", transition.to),
                ));
            }
        }
    }
    Ok(())
}

pub async fn create(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Json(payload): Json<CreateServiceTypeRequest>,
) -> AppResult<Json<ServiceTypeResponse>> {
    if !identity.is_admin() {
        return Err(AppError::Forbidden);
    }

    let property_schema: Schema = serde_json::from_value(payload.property_schema.clone())
        .map_err(|e| AppError::invalid("propertySchema", e.to_string()))?;
    let mut errors = schema::validate_structure(&property_schema);
    if let Err(e) = validate_lifecycle(&payload.lifecycle_schema) {
        errors.push(e);
    }
    if !errors.is_empty() {
        return Err(AppError::InvalidInput(errors));
    }

    let mut tx = pool.begin().await?;
    let service_type = sqlx::query_as::<_, ServiceType>(
        "INSERT INTO service_types (id, name, property_schema, lifecycle_schema) VALUES ($1, $2, $3, $4) \
         RETURNING id, name, property_schema, lifecycle_schema, created_at, updated_at",
    )
    .bind(Uuid::now_v7())
    .bind(&payload.name)
    .bind(&payload.property_schema)
    .bind(&payload.lifecycle_schema)
    .fetch_one(&mut *tx)
    .await?;

    crate::audit::record(
        &mut tx,
        &identity,
        "service_type.created",
        "service_type",
        service_type.id,
        serde_json::json!({ "name": service_type.name }),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(service_type.into()))
}

pub async fn get(
    Extension(pool): Extension<PgPool>,
    AuthContext(_identity): AuthContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ServiceTypeResponse>> {
    let service_type = sqlx::query_as::<_, ServiceType>(
        "SELECT id, name, property_schema, lifecycle_schema, created_at, updated_at \
         FROM service_types WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound)?;
    Ok(Json(service_type.into()))
}

/// `POST /service-types/{id}/validate`: re-runs the structural check (§4.1)
/// against the stored property and lifecycle schemas, persisting nothing.
/// Lets an admin catch a bad schema edit without waiting for the next
/// `ApplyCreate` to discover it.
pub async fn validate(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<FieldError>>> {
    if !identity.is_admin() {
        return Err(AppError::Forbidden);
    }
    let service_type = sqlx::query_as::<_, ServiceType>(
        "SELECT id, name, property_schema, lifecycle_schema, created_at, updated_at \
         FROM service_types WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound)?;

    let property_schema: Schema = serde_json::from_value(service_type.property_schema.clone())
        .map_err(|e| AppError::Internal(format!("stored propertySchema is malformed: {e}")))?;
    let mut errors = schema::validate_structure(&property_schema);
    if let Err(e) = validate_lifecycle(&service_type.lifecycle_schema) {
        errors.push(e);
    }
    Ok(Json(errors))
}

/// Referenced by Service (§3): deletion is refused if any Service uses it.
pub async fn delete(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Path(id): Path<Uuid>,
) -> AppResult<axum::http::StatusCode> {
    if !identity.is_admin() {
        return Err(AppError::Forbidden);
    }
    let in_use: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM services WHERE service_type_id = $1")
        .bind(id)
        .fetch_one(&pool)
        .await?;
    if in_use > 0 {
        return Err(AppError::Conflict("service type is referenced by existing services".into()));
    }
    let mut tx = pool.begin().await?;
    let result = sqlx::query("DELETE FROM service_types WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    crate::audit::record(&mut tx, &identity, "service_type.deleted", "service_type", id, serde_json::json!({}))
        .await?;
    tx.commit().await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}
