// key: store-audit -> exactly one AuditEntry per mutating command
//
// Every command that mutates state calls `record` once, inside the same
// transaction as the mutation it describes. Omitting it is a correctness
// bug (Testable Property 3): `commit(command) <=> commit(audit)`.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, Postgres, Transaction};
use uuid::Uuid;

use crate::models::{Identity, TokenRole};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEntry {
    pub id: Uuid,
    pub authority_type: String,
    pub authority_id: Option<Uuid>,
    pub event_type: String,
    pub target_type: String,
    pub target_id: Uuid,
    pub properties: Value,
    pub created_at: DateTime<Utc>,
}

fn authority_type(role: TokenRole) -> &'static str {
    match role {
        TokenRole::FulcrumAdmin => "fulcrum_admin",
        TokenRole::Participant => "participant",
        TokenRole::Agent => "agent",
    }
}

pub async fn record(
    tx: &mut Transaction<'_, Postgres>,
    identity: &Identity,
    event_type: &str,
    target_type: &str,
    target_id: Uuid,
    properties: Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO audit_entries (id, authority_type, authority_id, event_type, target_type, target_id, properties) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(Uuid::now_v7())
    .bind(authority_type(identity.role))
    .bind(identity.scope_id)
    .bind(event_type)
    .bind(target_type)
    .bind(target_id)
    .bind(properties)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// `record` for system-originated events (reapers) that have no caller
/// identity.
pub async fn record_system(
    tx: &mut Transaction<'_, Postgres>,
    event_type: &str,
    target_type: &str,
    target_id: Uuid,
    properties: Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO audit_entries (id, authority_type, authority_id, event_type, target_type, target_id, properties) \
         VALUES ($1, 'system', NULL, $2, $3, $4, $5)",
    )
    .bind(Uuid::now_v7())
    .bind(event_type)
    .bind(target_type)
    .bind(target_id)
    .bind(properties)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
