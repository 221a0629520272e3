// key: http-vault
use axum::extract::{Extension, Path};
use axum::Json;
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::extractor::AuthContext;
use crate::vault;

/// `GET /vault/secrets/{ref}`: resolves cleartext for the agent that owns
/// the referencing service. Never reachable during schema validation — only
/// this handler and job processing ever decrypt a vault record.
pub async fn get(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Path(reference): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let agent_id = identity.agent_id().ok_or(AppError::Forbidden)?;

    let owner_service_id: Uuid = sqlx::query("SELECT owner_service_id FROM vault_secrets WHERE reference = $1")
        .bind(reference)
        .fetch_optional(&pool)
        .await?
        .map(|row| row.get("owner_service_id"))
        .ok_or(AppError::NotFound)?;

    let service_agent_id: Uuid = sqlx::query("SELECT agent_id FROM services WHERE id = $1")
        .bind(owner_service_id)
        .fetch_optional(&pool)
        .await?
        .map(|row| row.get("agent_id"))
        .ok_or(AppError::NotFound)?;

    if service_agent_id != agent_id {
        return Err(AppError::Forbidden);
    }

    let value = vault::get(&pool, reference).await.map_err(|e| AppError::Internal(e))?;
    Ok(Json(value))
}
