// key: agent-registry -> connectivity state machine + least-loaded discovery
use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit;
use crate::error::{AppError, AppResult};
use crate::models::{Agent, Connectivity};

/// Records a successful authenticated call from `agent_id`: bumps
/// `lastStatusUpdateAt` and, if the agent was New, flips it Connected. This
/// is the only path that ever sets Connected.
pub async fn touch(pool: &PgPool, agent_id: Uuid) -> AppResult<()> {
    sqlx::query(
        "UPDATE agents SET last_status_update_at = now(), updated_at = now(), \
         connectivity = CASE WHEN connectivity = 'new' THEN 'connected' ELSE connectivity END \
         WHERE id = $1",
    )
    .bind(agent_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn enable(pool: &PgPool, identity: &crate::models::Identity, agent_id: Uuid) -> AppResult<Agent> {
    set_connectivity(pool, identity, agent_id, Connectivity::New, "agent.enabled").await
}

pub async fn disable(pool: &PgPool, identity: &crate::models::Identity, agent_id: Uuid) -> AppResult<Agent> {
    set_connectivity(pool, identity, agent_id, Connectivity::Disabled, "agent.disabled").await
}

async fn set_connectivity(
    pool: &PgPool,
    identity: &crate::models::Identity,
    agent_id: Uuid,
    connectivity: Connectivity,
    event_type: &str,
) -> AppResult<Agent> {
    let mut tx = pool.begin().await?;
    let agent = sqlx::query_as::<_, Agent>(
        "UPDATE agents SET connectivity = $1, updated_at = now() WHERE id = $2 \
         RETURNING id, name, participant_id, agent_type_id, connectivity, token_hash, tags, \
         configuration, service_pool_set_id, last_status_update_at, created_at, updated_at",
    )
    .bind(connectivity)
    .bind(agent_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound)?;
    audit::record(&mut tx, identity, event_type, "agent", agent_id, serde_json::json!({}))
        .await?;
    tx.commit().await?;
    Ok(agent)
}

/// Agents whose last heartbeat predates `timeout` and are still marked
/// Connected are moved to Disconnected. A Disabled agent never participates
/// here — it is excluded from dispatch administratively, not by health.
/// Each disconnection gets a system audit entry in the same transaction.
pub async fn reap_stale(pool: &PgPool, timeout: Duration) -> AppResult<u64> {
    let cutoff = Utc::now() - timeout;
    let mut tx = pool.begin().await?;
    let disconnected: Vec<Uuid> = sqlx::query_scalar(
        "UPDATE agents SET connectivity = 'disconnected', updated_at = now() \
         WHERE connectivity = 'connected' AND last_status_update_at < $1 \
         RETURNING id",
    )
    .bind(cutoff)
    .fetch_all(&mut *tx)
    .await?;

    for agent_id in &disconnected {
        audit::record_system(
            &mut tx,
            "agent.disconnected",
            "agent",
            *agent_id,
            serde_json::json!({ "reason": "health timeout" }),
        )
        .await?;
    }
    tx.commit().await?;
    Ok(disconnected.len() as u64)
}

/// Picks the least-loaded Connected agent of `agent_type_id` whose `tags`
/// are a superset of `requested_tags`. "Least loaded" = fewest
/// Pending+Processing jobs, ties broken by `createdAt ASC`.
pub async fn discover(
    pool: &PgPool,
    agent_type_id: Uuid,
    requested_tags: &[String],
) -> AppResult<Agent> {
    let agent = sqlx::query_as::<_, Agent>(
        "SELECT a.id, a.name, a.participant_id, a.agent_type_id, a.connectivity, a.token_hash, \
         a.tags, a.configuration, a.service_pool_set_id, a.last_status_update_at, a.created_at, \
         a.updated_at \
         FROM agents a \
         LEFT JOIN jobs j ON j.agent_id = a.id AND j.state IN ('pending', 'processing') \
         WHERE a.agent_type_id = $1 AND a.connectivity = 'connected' AND a.tags @> $2 \
         GROUP BY a.id \
         ORDER BY COUNT(j.id) ASC, a.created_at ASC \
         LIMIT 1",
    )
    .bind(agent_type_id)
    .bind(requested_tags)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::invalid("agentTags", "no eligible agent matches the requested tags"))?;
    Ok(agent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_cutoff_is_in_the_past() {
        let cutoff = Utc::now() - Duration::seconds(90);
        assert!(cutoff < Utc::now());
    }
}
