// Shared test setup: fixture loading and minimal entity seeding. Only ever
// used from `#[sqlx::test]` integration tests, never from unit tests inside
// src/ (those build their own fixtures inline).
use std::path::Path;

use anyhow::{bail, Context};
use fulcrum_core::models::{Identity, TokenRole};
use serde::de::DeserializeOwned;
use sqlx::PgPool;
use uuid::Uuid;

/// Loads a fixture by extension, the same JSON-or-YAML dispatch the rest of
/// the corpus uses for manifest files.
pub fn load_fixture<T: DeserializeOwned>(name: &str) -> anyhow::Result<T> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name);
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading fixture {}", path.display()))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => {
            serde_json::from_str(&raw).with_context(|| format!("parsing JSON fixture {}", path.display()))
        }
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&raw).with_context(|| format!("parsing YAML fixture {}", path.display()))
        }
        other => bail!("unsupported fixture extension {:?} for {}", other, path.display()),
    }
}

pub fn admin_identity() -> Identity {
    Identity { role: TokenRole::FulcrumAdmin, scope_id: None }
}

pub fn participant_identity(id: Uuid) -> Identity {
    Identity { role: TokenRole::Participant, scope_id: Some(id) }
}

pub fn agent_identity(id: Uuid) -> Identity {
    Identity { role: TokenRole::Agent, scope_id: Some(id) }
}

pub async fn seed_participant(pool: &PgPool, name: &str) -> Uuid {
    let id = Uuid::now_v7();
    sqlx::query("INSERT INTO participants (id, name) VALUES ($1, $2)")
        .bind(id)
        .bind(name)
        .execute(pool)
        .await
        .unwrap();
    id
}

pub async fn seed_agent_type(pool: &PgPool, name: &str) -> Uuid {
    let id = Uuid::now_v7();
    sqlx::query("INSERT INTO agent_types (id, name, configuration_schema) VALUES ($1, $2, '{}')")
        .bind(id)
        .bind(name)
        .execute(pool)
        .await
        .unwrap();
    id
}

pub async fn seed_agent(pool: &PgPool, participant_id: Uuid, agent_type_id: Uuid, name: &str) -> Uuid {
    let id = Uuid::now_v7();
    sqlx::query(
        "INSERT INTO agents (id, name, participant_id, agent_type_id, token_hash) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind(name)
    .bind(participant_id)
    .bind(agent_type_id)
    .bind(format!("test-token-hash-{id}"))
    .execute(pool)
    .await
    .unwrap();
    id
}

pub async fn seed_agent_with_pool_set(
    pool: &PgPool,
    participant_id: Uuid,
    agent_type_id: Uuid,
    name: &str,
    pool_set_id: Uuid,
) -> Uuid {
    let id = Uuid::now_v7();
    sqlx::query(
        "INSERT INTO agents (id, name, participant_id, agent_type_id, token_hash, service_pool_set_id) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(id)
    .bind(name)
    .bind(participant_id)
    .bind(agent_type_id)
    .bind(format!("test-token-hash-{id}"))
    .bind(pool_set_id)
    .execute(pool)
    .await
    .unwrap();
    id
}

pub async fn seed_service_type(
    pool: &PgPool,
    name: &str,
    property_schema: &serde_json::Value,
    lifecycle_schema: &serde_json::Value,
) -> Uuid {
    let id = Uuid::now_v7();
    sqlx::query(
        "INSERT INTO service_types (id, name, property_schema, lifecycle_schema) VALUES ($1, $2, $3, $4)",
    )
    .bind(id)
    .bind(name)
    .bind(property_schema)
    .bind(lifecycle_schema)
    .execute(pool)
    .await
    .unwrap();
    id
}

pub async fn seed_pool_set(pool: &PgPool, participant_id: Uuid, name: &str) -> Uuid {
    let id = Uuid::now_v7();
    sqlx::query("INSERT INTO service_pool_sets (id, name, participant_id) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(name)
        .bind(participant_id)
        .execute(pool)
        .await
        .unwrap();
    id
}

pub async fn seed_list_pool(pool: &PgPool, pool_set_id: Uuid, pool_type: &str, property_type: &str, values: &[&str]) -> Uuid {
    let id = Uuid::now_v7();
    sqlx::query(
        "INSERT INTO service_pools (id, pool_set_id, pool_type, property_type, generator_kind, generator_config) \
         VALUES ($1, $2, $3, $4, 'list', '{}')",
    )
    .bind(id)
    .bind(pool_set_id)
    .bind(pool_type)
    .bind(property_type)
    .execute(pool)
    .await
    .unwrap();
    for v in values {
        sqlx::query("INSERT INTO service_pool_values (id, pool_id, value) VALUES ($1, $2, $3)")
            .bind(Uuid::now_v7())
            .bind(id)
            .bind(serde_json::Value::String(v.to_string()))
            .execute(pool)
            .await
            .unwrap();
    }
    id
}
