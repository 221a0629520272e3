// key: job-queue -> Pending -> Processing -> {Completed, Failed}
//
// `claim` is the only place that moves a job out of Pending; it is a single
// `SELECT ... FOR UPDATE SKIP LOCKED` round-trip so two agents polling
// concurrently never receive the same row (Testable Property 8). Complete
// and Fail are delegated to `lifecycle`, which owns the service-status side
// of the transition; this module only ever touches `jobs` directly for
// claim and for the two reapers.
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::Job;

fn row_to_job(row: &sqlx::postgres::PgRow) -> Job {
    Job {
        id: row.get("id"),
        service_id: row.get("service_id"),
        agent_id: row.get("agent_id"),
        action: row.get("action"),
        state: row.get("state"),
        priority: row.get("priority"),
        params: row.get("params"),
        claimed_at: row.get("claimed_at"),
        completed_at: row.get("completed_at"),
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Lists every Pending job visible to `agent_id`, highest priority first.
pub async fn list_pending(pool: &PgPool, agent_id: Uuid) -> AppResult<Vec<Job>> {
    let rows = sqlx::query(
        "SELECT id, service_id, agent_id, action, state, priority, params, claimed_at, \
         completed_at, error_message, created_at, updated_at FROM jobs \
         WHERE agent_id = $1 AND state = 'pending' \
         ORDER BY priority DESC, created_at ASC",
    )
    .bind(agent_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_job).collect())
}

/// Atomically claims the highest-priority Pending job belonging to
/// `agent_id`: one `UPDATE ... FROM (SELECT ... FOR UPDATE SKIP LOCKED)`
/// round-trip so the claim itself carries the row lock. A Disabled agent is
/// excluded from the candidate set entirely — disabling stops new claims,
/// though a job already Processing when the agent was disabled is left to
/// run (DESIGN.md).
pub async fn claim(pool: &PgPool, agent_id: Uuid, job_id: Uuid) -> AppResult<Job> {
    let row = sqlx::query(
        "UPDATE jobs SET state = 'processing', claimed_at = now(), updated_at = now() \
         WHERE id = (
             SELECT j.id FROM jobs j
             JOIN agents a ON a.id = j.agent_id
             WHERE j.id = $1 AND j.agent_id = $2 AND j.state = 'pending' AND a.connectivity <> 'disabled'
             ORDER BY j.priority DESC, j.created_at ASC
             FOR UPDATE SKIP LOCKED
         )
         RETURNING id, service_id, agent_id, action, state, priority, params, claimed_at, \
         completed_at, error_message, created_at, updated_at",
    )
    .bind(job_id)
    .bind(agent_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::Conflict("job is not pending, not yours, already claimed, or your agent is disabled".into()))?;
    Ok(row_to_job(&row))
}

/// Claims whichever Pending job for `agent_id` has highest priority,
/// without the caller naming one up front (used by agents that poll
/// `/jobs/pending` then immediately want "the next one"). Same Disabled
/// exclusion as `claim`.
pub async fn claim_next(pool: &PgPool, agent_id: Uuid) -> AppResult<Job> {
    let row = sqlx::query(
        "UPDATE jobs SET state = 'processing', claimed_at = now(), updated_at = now() \
         WHERE id = (
             SELECT j.id FROM jobs j
             JOIN agents a ON a.id = j.agent_id
             WHERE j.agent_id = $1 AND j.state = 'pending' AND a.connectivity <> 'disabled'
             ORDER BY j.priority DESC, j.created_at ASC
             FOR UPDATE SKIP LOCKED
             LIMIT 1
         )
         RETURNING id, service_id, agent_id, action, state, priority, params, claimed_at, \
         completed_at, error_message, created_at, updated_at",
    )
    .bind(agent_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound)?;
    Ok(row_to_job(&row))
}

/// Jobs stuck Processing past `timeout`, oldest claim first. Consumed by
/// the timeout reaper, which hands each one to `lifecycle::force_timeout`.
pub async fn find_timed_out(pool: &PgPool, timeout: Duration) -> AppResult<Vec<Job>> {
    let cutoff: DateTime<Utc> = Utc::now() - timeout;
    let rows = sqlx::query(
        "SELECT id, service_id, agent_id, action, state, priority, params, claimed_at, \
         completed_at, error_message, created_at, updated_at FROM jobs \
         WHERE state = 'processing' AND claimed_at < $1 \
         ORDER BY claimed_at ASC",
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_job).collect())
}

/// Deletes Completed/Failed jobs older than `retention`. Audit records are
/// untouched — retention only ever prunes the queue, never the ledger.
pub async fn reap_retention(pool: &PgPool, retention: Duration) -> AppResult<u64> {
    let cutoff: DateTime<Utc> = Utc::now() - retention;
    let result = sqlx::query(
        "DELETE FROM jobs WHERE state IN ('completed', 'failed') AND completed_at < $1",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_cutoffs_move_backward_in_time() {
        let now = Utc::now();
        let cutoff = now - Duration::seconds(600);
        assert!(cutoff < now);
    }
}
