// key: http-service-pools -> provider-owned pool sets/pools/values feeding the pool allocator
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
use crate::models::{PoolGeneratorKind, ServicePool, ServicePoolSet, ServicePoolValue};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePoolSetRequest {
    pub name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSetResponse {
    pub id: Uuid,
    pub name: String,
    pub participant_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<ServicePoolSet> for PoolSetResponse {
    fn from(s: ServicePoolSet) -> Self {
        Self { id: s.id, name: s.name, participant_id: s.participant_id, created_at: s.created_at }
    }
}

/// `POST /participants/{id}/service-pool-sets`: the owning provider (or
/// admin) creates an empty pool set to later attach `ServicePool`s and
/// assign to its `Agent`s.
pub async fn create_set(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Path(participant_id): Path<Uuid>,
    Json(payload): Json<CreatePoolSetRequest>,
) -> AppResult<Json<PoolSetResponse>> {
    authorization::check(&identity, "create", &Target::Participant { id: participant_id })?;

    let mut tx = pool.begin().await?;
    let set = sqlx::query_as::<_, ServicePoolSet>(
        "INSERT INTO service_pool_sets (id, name, participant_id) VALUES ($1, $2, $3) \
         RETURNING id, name, participant_id, created_at",
    )
    .bind(Uuid::now_v7())
    .bind(&payload.name)
    .bind(participant_id)
    .fetch_one(&mut *tx)
    .await?;

    crate::audit::record(
        &mut tx,
        &identity,
        "service_pool_set.created",
        "service_pool_set",
        set.id,
        serde_json::json!({ "name": set.name }),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(set.into()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePoolRequest {
    pub pool_type: String,
    pub property_type: String,
    pub generator_kind: PoolGeneratorKind,
    #[serde(default)]
    pub generator_config: Value,
    /// Pre-provisioned values for a `list`-type pool. Ignored for `subnet`,
    /// which materializes its values on first allocation (§4.3).
    #[serde(default)]
    pub values: Vec<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolResponse {
    pub id: Uuid,
    pub pool_set_id: Uuid,
    pub pool_type: String,
    pub property_type: String,
    pub generator_kind: PoolGeneratorKind,
    pub generator_config: Value,
    pub created_at: DateTime<Utc>,
}

impl From<ServicePool> for PoolResponse {
    fn from(p: ServicePool) -> Self {
        Self {
            id: p.id,
            pool_set_id: p.pool_set_id,
            pool_type: p.pool_type,
            property_type: p.property_type,
            generator_kind: p.generator_kind,
            generator_config: p.generator_config,
            created_at: p.created_at,
        }
    }
}

async fn pool_set_owner(pool: &PgPool, pool_set_id: Uuid) -> AppResult<Uuid> {
    sqlx::query_scalar("SELECT participant_id FROM service_pool_sets WHERE id = $1")
        .bind(pool_set_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound)
}

/// `POST /service-pool-sets/{id}/pools`: declares one typed pool
/// (`list` or `subnet`) and, for `list` pools, seeds its free values.
pub async fn create_pool(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Path(pool_set_id): Path<Uuid>,
    Json(payload): Json<CreatePoolRequest>,
) -> AppResult<Json<PoolResponse>> {
    let owner = pool_set_owner(&pool, pool_set_id).await?;
    authorization::check(&identity, "create", &Target::Participant { id: owner })?;

    if matches!(payload.generator_kind, PoolGeneratorKind::List) && payload.values.is_empty() {
        return Err(AppError::invalid("values", "list-type pools require at least one value"));
    }

    let mut tx = pool.begin().await?;
    let created = sqlx::query_as::<_, ServicePool>(
        "INSERT INTO service_pools (id, pool_set_id, pool_type, property_type, generator_kind, generator_config) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING id, pool_set_id, pool_type, property_type, generator_kind, generator_config, created_at",
    )
    .bind(Uuid::now_v7())
    .bind(pool_set_id)
    .bind(&payload.pool_type)
    .bind(&payload.property_type)
    .bind(payload.generator_kind)
    .bind(&payload.generator_config)
    .fetch_one(&mut *tx)
    .await?;

    for value in &payload.values {
        sqlx::query("INSERT INTO service_pool_values (id, pool_id, value) VALUES ($1, $2, $3)")
            .bind(Uuid::now_v7())
            .bind(created.id)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }

    crate::audit::record(
        &mut tx,
        &identity,
        "service_pool.created",
        "service_pool",
        created.id,
        serde_json::json!({ "poolType": created.pool_type, "valueCount": payload.values.len() }),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(created.into()))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolValueResponse {
    pub id: Uuid,
    pub pool_id: Uuid,
    pub value: Value,
    pub service_id: Option<Uuid>,
    pub property_name: Option<String>,
    pub allocated_at: Option<DateTime<Utc>>,
}

impl From<ServicePoolValue> for PoolValueResponse {
    fn from(v: ServicePoolValue) -> Self {
        Self {
            id: v.id,
            pool_id: v.pool_id,
            value: v.value,
            service_id: v.service_id,
            property_name: v.property_name,
            allocated_at: v.allocated_at,
        }
    }
}

/// `GET /service-pools/{id}/values`: lets a provider inspect allocation
/// state without resolving any vault reference (pool values are never
/// secret).
pub async fn list_values(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Path(pool_id): Path<Uuid>,
) -> AppResult<Json<Vec<PoolValueResponse>>> {
    let pool_set_id: Uuid = sqlx::query_scalar("SELECT pool_set_id FROM service_pools WHERE id = $1")
        .bind(pool_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound)?;
    let owner = pool_set_owner(&pool, pool_set_id).await?;
    authorization::check(&identity, "read", &Target::Participant { id: owner })?;

    let values = sqlx::query_as::<_, ServicePoolValue>(
        "SELECT id, pool_id, value, service_id, property_name, allocated_at \
         FROM service_pool_values WHERE pool_id = $1 ORDER BY id ASC",
    )
    .bind(pool_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(values.into_iter().map(PoolValueResponse::from).collect()))
}
