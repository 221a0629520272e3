// key: tokens-api -> mint-and-revoke
use axum::{extract::Extension, Json};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::audit;
use crate::error::{AppError, AppResult};
use crate::extractor::{hash_token, AuthContext};
use crate::models::TokenRole;

#[derive(Deserialize)]
pub struct CreateTokenRequest {
    pub role: TokenRole,
    #[serde(default)]
    pub scope_id: Option<Uuid>,
    #[serde(default)]
    pub ttl_seconds: Option<i64>,
}

#[derive(Serialize)]
pub struct CreateTokenResponse {
    pub id: Uuid,
    pub role: TokenRole,
    pub scope_id: Option<Uuid>,
    pub expires_at: chrono::DateTime<Utc>,
    /// The cleartext bearer value. Returned exactly once; only the hash is stored.
    pub token: String,
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Mints a token row and returns `(row_id, cleartext, expiry)`. Shared by the
/// `/tokens` endpoint and agent self-registration (`POST /agents`). Takes the
/// caller's transaction rather than the pool so the insert lands atomically
/// with whatever else the caller is committing (§7: all or none).
pub async fn mint_token(
    tx: &mut Transaction<'_, Postgres>,
    role: TokenRole,
    scope_id: Option<Uuid>,
    ttl: Duration,
) -> AppResult<(Uuid, String, chrono::DateTime<Utc>)> {
    let raw = random_token();
    let hashed = hash_token(&raw);
    let expires_at = Utc::now() + ttl;
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO tokens (role, hashed_value, scope_id, expires_at) \
         VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(role)
    .bind(&hashed)
    .bind(scope_id)
    .bind(expires_at)
    .fetch_one(&mut **tx)
    .await?;
    Ok((id, raw, expires_at))
}

const DEFAULT_TOKEN_TTL_SECONDS: i64 = 30 * 24 * 3600;

pub async fn create_token(
    Extension(pool): Extension<PgPool>,
    AuthContext(identity): AuthContext,
    Json(payload): Json<CreateTokenRequest>,
) -> AppResult<Json<CreateTokenResponse>> {
    match identity.role {
        TokenRole::FulcrumAdmin => {}
        TokenRole::Participant => {
            let allowed = match payload.role {
                TokenRole::Participant => payload.scope_id == identity.scope_id,
                TokenRole::Agent => {
                    let Some(agent_id) = payload.scope_id else {
                        return Err(AppError::invalid("scopeId", "agent scopeId required"));
                    };
                    let owner: Option<Uuid> =
                        sqlx::query_scalar("SELECT participant_id FROM agents WHERE id = $1")
                            .bind(agent_id)
                            .fetch_optional(&pool)
                            .await?;
                    owner == identity.scope_id
                }
                TokenRole::FulcrumAdmin => false,
            };
            if !allowed {
                return Err(AppError::Forbidden);
            }
        }
        TokenRole::Agent => return Err(AppError::Forbidden),
    }

    let ttl = Duration::seconds(payload.ttl_seconds.unwrap_or(DEFAULT_TOKEN_TTL_SECONDS));

    let mut tx = pool.begin().await?;
    let (id, token, expires_at) = mint_token(&mut tx, payload.role, payload.scope_id, ttl).await?;
    audit::record(
        &mut tx,
        &identity,
        "token.created",
        "token",
        id,
        serde_json::json!({ "role": payload.role, "scopeId": payload.scope_id }),
    )
    .await?;
    tx.commit().await?;

    Ok(Json(CreateTokenResponse {
        id,
        role: payload.role,
        scope_id: payload.scope_id,
        expires_at,
        token,
    }))
}

#[cfg(test)]
mod tests {
    use super::random_token;

    #[test]
    fn random_tokens_are_url_safe_and_unique() {
        let a = random_token();
        let b = random_token();
        assert_ne!(a, b);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
