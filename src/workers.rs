// key: background-workers -> independent tickers, no shared state
//
// Each reaper is a `tokio::spawn`ed loop: sleep one interval, do one bulk
// statement (or one transaction per candidate row), repeat until the
// shutdown signal fires. No reaper ever takes a process-wide lock; all
// coordination is the database's row locking.
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use sqlx::PgPool;
use tokio::sync::watch;

use crate::{agents, job_queue, lifecycle};

/// Spawns all three reapers, returning nothing: they run until the process
/// exits or `shutdown` fires. Intervals/timeouts are read once at spawn
/// time from config, matching the one-shot `Lazy` config pattern used
/// everywhere else in this crate.
pub fn spawn_all(pool: PgPool, shutdown: watch::Receiver<bool>) {
    tokio::spawn(health_reaper(pool.clone(), shutdown.clone()));
    tokio::spawn(job_timeout_reaper(pool.clone(), shutdown.clone()));
    tokio::spawn(job_retention_reaper(pool, shutdown));
}

async fn tick_or_shutdown(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => true,
        _ = shutdown.changed() => false,
    }
}

async fn health_reaper(pool: PgPool, mut shutdown: watch::Receiver<bool>) {
    let interval = *crate::config::JOB_MAINTENANCE_INTERVAL;
    let timeout = ChronoDuration::from_std(*crate::config::AGENT_HEALTH_TIMEOUT)
        .expect("configured timeout fits in a chrono Duration");
    loop {
        if !tick_or_shutdown(interval, &mut shutdown).await {
            return;
        }
        match agents::reap_stale(&pool, timeout).await {
            Ok(n) if n > 0 => tracing::info!(count = n, "agent health reaper disconnected stale agents"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "agent health reaper tick failed"),
        }
    }
}

async fn job_timeout_reaper(pool: PgPool, mut shutdown: watch::Receiver<bool>) {
    let interval = *crate::config::JOB_MAINTENANCE_INTERVAL;
    let timeout = ChronoDuration::from_std(*crate::config::JOB_TIMEOUT_INTERVAL)
        .expect("configured timeout fits in a chrono Duration");
    loop {
        if !tick_or_shutdown(interval, &mut shutdown).await {
            return;
        }
        let timed_out = match job_queue::find_timed_out(&pool, timeout).await {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::warn!(error = %e, "job timeout reaper query failed");
                continue;
            }
        };
        for job in &timed_out {
            if let Err(e) = lifecycle::force_timeout(&pool, job).await {
                tracing::warn!(error = %e, job_id = %job.id, "job timeout reaper failed to fail job");
            } else {
                tracing::info!(job_id = %job.id, service_id = %job.service_id, "job timed out");
            }
        }
    }
}

async fn job_retention_reaper(pool: PgPool, mut shutdown: watch::Receiver<bool>) {
    let interval = *crate::config::JOB_MAINTENANCE_INTERVAL;
    let retention = ChronoDuration::from_std(*crate::config::JOB_RETENTION_INTERVAL)
        .expect("configured retention fits in a chrono Duration");
    loop {
        if !tick_or_shutdown(interval, &mut shutdown).await {
            return;
        }
        match job_queue::reap_retention(&pool, retention).await {
            Ok(n) if n > 0 => tracing::info!(count = n, "job retention reaper deleted aged jobs"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "job retention reaper tick failed"),
        }
    }
}
