// key: ambient-auth -> bearer-token-extractor
use axum::async_trait;
use axum::{
    extract::{Extension, FromRequestParts},
    http::{request::Parts, StatusCode},
};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::PgPool;

use crate::models::{Identity, Token, TokenRole};

pub fn hash_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Resolves the caller's [`Identity`] from `Authorization: Bearer <token>`.
/// Structurally identical to the teacher crate's `AuthUser` extractor, but
/// backed by the `tokens` table instead of a signed JWT, per DESIGN.md.
pub struct AuthContext(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or((StatusCode::UNAUTHORIZED, "missing bearer token"))?;

        let Extension(pool) = Extension::<PgPool>::from_request_parts(parts, state)
            .await
            .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "pool unavailable"))?;

        let hashed = hash_token(raw);
        let token = sqlx::query_as::<_, Token>(
            "SELECT id, role, hashed_value, scope_id, expires_at, created_at \
             FROM tokens WHERE hashed_value = $1",
        )
        .bind(&hashed)
        .fetch_optional(&pool)
        .await
        .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "token lookup failed"))?
        .ok_or((StatusCode::UNAUTHORIZED, "invalid token"))?;

        if token.expires_at < Utc::now() {
            return Err((StatusCode::UNAUTHORIZED, "token expired"));
        }

        if token.role == TokenRole::Agent {
            if let Some(agent_id) = token.scope_id {
                if let Err(e) = crate::agents::touch(&pool, agent_id).await {
                    tracing::warn!(error = %e, %agent_id, "best-effort agent heartbeat update failed");
                }
            }
        }

        Ok(AuthContext(Identity {
            role: token.role,
            scope_id: token.scope_id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::hash_token;

    #[test]
    fn hashing_is_stable_and_collision_resistant_for_distinct_inputs() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), hash_token("abd"));
    }
}
