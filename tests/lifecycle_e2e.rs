// End-to-end coverage of the documented service lifecycle scenarios: happy
// creation, error-regex routing, property immutability and job timeout.
mod support;

use chrono::Duration;
use fulcrum_core::lifecycle::{self, CreateServiceRequest};
use fulcrum_core::models::JobState;
use fulcrum_core::{job_queue, schema};
use serde_json::json;
use sqlx::PgPool;

async fn seed_vm_service_type(pool: &PgPool) -> (uuid::Uuid, uuid::Uuid, uuid::Uuid) {
    let property_schema: schema::Schema = support::load_fixture("vm_property_schema.yaml").unwrap();
    let lifecycle_schema: lifecycle::LifecycleSchema =
        support::load_fixture("vm_lifecycle_schema.yaml").unwrap();

    let participant_id = support::seed_participant(pool, "acme-cloud").await;
    let agent_type_id = support::seed_agent_type(pool, "vm-driver").await;
    let agent_id = support::seed_agent(pool, participant_id, agent_type_id, "vm-driver-1").await;
    let service_type_id = support::seed_service_type(
        pool,
        "vm-lifecycle",
        &serde_json::to_value(&property_schema).unwrap(),
        &serde_json::to_value(&lifecycle_schema).unwrap(),
    )
    .await;
    (agent_id, participant_id, service_type_id)
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn e1_happy_creation_produces_one_pending_job_and_completes(pool: PgPool) {
    sqlx::migrate!().run(&pool).await.unwrap();
    let (agent_id, _participant_id, service_type_id) = seed_vm_service_type(&pool).await;

    let identity = support::admin_identity();
    let (service, job) = lifecycle::create_service(
        &pool,
        &identity,
        CreateServiceRequest {
            name: "vm-1".into(),
            service_type_id,
            agent_id,
            group_id: None,
            consumer_participant_id: None,
            attributes: json!({}),
            properties: json!({ "id": "a", "cpu": 4, "memory": 512, "apiKey": "k1" }),
            priority: 0,
        },
    )
    .await
    .unwrap();

    assert_eq!(service.status, "New");
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.action, "create");

    let claimed = job_queue::claim(&pool, agent_id, job.id).await.unwrap();
    assert_eq!(claimed.state, JobState::Processing);

    let completed = lifecycle::report_completed(
        &pool,
        &support::agent_identity(agent_id),
        claimed.id,
        Default::default(),
    )
    .await
    .unwrap();
    assert_eq!(completed.state, JobState::Completed);

    let final_service = lifecycle::load_service(&pool, service.id).await.unwrap();
    assert_eq!(final_service.status, "Started");

    let audit_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM audit_entries WHERE target_type = 'service' AND target_id = $1",
    )
    .bind(service.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(audit_count, 2); // service.created + service.action.completed
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn e2_error_regex_routes_to_the_matching_transition(pool: PgPool) {
    sqlx::migrate!().run(&pool).await.unwrap();
    let (agent_id, _participant_id, service_type_id) = seed_vm_service_type(&pool).await;
    let identity = support::admin_identity();

    let (service, job) = lifecycle::create_service(
        &pool,
        &identity,
        CreateServiceRequest {
            name: "vm-quota".into(),
            service_type_id,
            agent_id,
            group_id: None,
            consumer_participant_id: None,
            attributes: json!({}),
            properties: json!({ "id": "a", "cpu": 4, "memory": 512, "apiKey": "k1" }),
            priority: 0,
        },
    )
    .await
    .unwrap();
    job_queue::claim(&pool, agent_id, job.id).await.unwrap();

    lifecycle::report_failed(
        &pool,
        &support::agent_identity(agent_id),
        job.id,
        "AWS quota exceeded".into(),
    )
    .await
    .unwrap();

    let failed_service = lifecycle::load_service(&pool, service.id).await.unwrap();
    assert_eq!(failed_service.status, "Failed");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn e2_error_without_regex_match_falls_back_to_unconditional_transition(pool: PgPool) {
    sqlx::migrate!().run(&pool).await.unwrap();
    let (agent_id, _participant_id, service_type_id) = seed_vm_service_type(&pool).await;
    let identity = support::admin_identity();

    let (service, job) = lifecycle::create_service(
        &pool,
        &identity,
        CreateServiceRequest {
            name: "vm-other".into(),
            service_type_id,
            agent_id,
            group_id: None,
            consumer_participant_id: None,
            attributes: json!({}),
            properties: json!({ "id": "a", "cpu": 4, "memory": 512, "apiKey": "k1" }),
            priority: 0,
        },
    )
    .await
    .unwrap();
    job_queue::claim(&pool, agent_id, job.id).await.unwrap();

    lifecycle::report_failed(
        &pool,
        &support::agent_identity(agent_id),
        job.id,
        "network unreachable".into(),
    )
    .await
    .unwrap();

    let failed_service = lifecycle::load_service(&pool, service.id).await.unwrap();
    assert_eq!(failed_service.status, "Stopped");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn e3_immutable_property_rejects_a_changed_value_but_accepts_a_noop(pool: PgPool) {
    sqlx::migrate!().run(&pool).await.unwrap();
    let (agent_id, _participant_id, service_type_id) = seed_vm_service_type(&pool).await;
    let identity = support::admin_identity();

    let (service, job) = lifecycle::create_service(
        &pool,
        &identity,
        CreateServiceRequest {
            name: "vm-immutable".into(),
            service_type_id,
            agent_id,
            group_id: None,
            consumer_participant_id: None,
            attributes: json!({}),
            properties: json!({ "id": "a", "cpu": 4, "memory": 512, "apiKey": "k1" }),
            priority: 0,
        },
    )
    .await
    .unwrap();
    job_queue::claim(&pool, agent_id, job.id).await.unwrap();
    lifecycle::report_completed(
        &pool,
        &support::agent_identity(agent_id),
        job.id,
        Default::default(),
    )
    .await
    .unwrap();

    let changed = lifecycle::submit_action(
        &pool,
        &identity,
        service.id,
        "delete",
        json!({ "id": "b" }),
        0,
    )
    .await;
    assert!(matches!(changed, Err(fulcrum_core::error::AppError::Conflict(_))));

    let noop = lifecycle::submit_action(&pool, &identity, service.id, "delete", json!({ "id": "a" }), 0)
        .await
        .unwrap();
    assert_eq!(noop.1.action, "delete");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn e6_timed_out_job_is_failed_and_lifecycle_applies_default_error_transition(pool: PgPool) {
    sqlx::migrate!().run(&pool).await.unwrap();
    let (agent_id, _participant_id, service_type_id) = seed_vm_service_type(&pool).await;
    let identity = support::admin_identity();

    let (service, job) = lifecycle::create_service(
        &pool,
        &identity,
        CreateServiceRequest {
            name: "vm-timeout".into(),
            service_type_id,
            agent_id,
            group_id: None,
            consumer_participant_id: None,
            attributes: json!({}),
            properties: json!({ "id": "a", "cpu": 4, "memory": 512, "apiKey": "k1" }),
            priority: 0,
        },
    )
    .await
    .unwrap();
    job_queue::claim(&pool, agent_id, job.id).await.unwrap();

    // Backdate the claim so it reads as already timed out.
    sqlx::query("UPDATE jobs SET claimed_at = now() - interval '1 hour' WHERE id = $1")
        .bind(job.id)
        .execute(&pool)
        .await
        .unwrap();

    let timed_out = job_queue::find_timed_out(&pool, Duration::minutes(5)).await.unwrap();
    assert_eq!(timed_out.len(), 1);
    assert_eq!(timed_out[0].id, job.id);

    let failed_job = lifecycle::force_timeout(&pool, &timed_out[0]).await.unwrap();
    assert_eq!(failed_job.state, JobState::Failed);
    assert_eq!(failed_job.error_message.as_deref(), Some("timeout"));

    let final_service = lifecycle::load_service(&pool, service.id).await.unwrap();
    assert_eq!(final_service.status, "Stopped"); // default onError transition, no regexp matched
}
