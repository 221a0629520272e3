// E4 of the documented lifecycle scenarios: a persistent secret gets a fresh
// vault reference on every write, the previous reference is deleted, and the
// record disappears entirely once the owning service reaches a terminal
// state.
mod support;

use base64::engine::general_purpose::STANDARD as Base64Engine;
use base64::Engine as _;
use fulcrum_core::lifecycle::{self, CreateServiceRequest};
use fulcrum_core::vault;
use serde_json::json;
use sqlx::PgPool;

fn set_vault_key() {
    std::env::set_var("FULCRUM_VAULT_ENCRYPTION_KEY", Base64Engine.encode([3u8; 32]));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn secret_rotates_to_a_new_reference_and_deletes_the_previous_one(pool: PgPool) {
    set_vault_key();
    sqlx::migrate!().run(&pool).await.unwrap();

    let property_schema: fulcrum_core::schema::Schema =
        support::load_fixture("vm_property_schema.yaml").unwrap();
    let lifecycle_schema: lifecycle::LifecycleSchema =
        support::load_fixture("vm_lifecycle_schema.yaml").unwrap();

    let participant_id = support::seed_participant(&pool, "acme-cloud").await;
    let agent_type_id = support::seed_agent_type(&pool, "vm-driver").await;
    let agent_id = support::seed_agent(&pool, participant_id, agent_type_id, "vm-driver-1").await;
    let service_type_id = support::seed_service_type(
        &pool,
        "vm-lifecycle",
        &serde_json::to_value(&property_schema).unwrap(),
        &serde_json::to_value(&lifecycle_schema).unwrap(),
    )
    .await;

    let identity = support::admin_identity();
    let (service, create_job) = lifecycle::create_service(
        &pool,
        &identity,
        CreateServiceRequest {
            name: "vm-secret".into(),
            service_type_id,
            agent_id,
            group_id: None,
            consumer_participant_id: None,
            attributes: json!({}),
            properties: json!({ "id": "a", "cpu": 1, "memory": 256, "apiKey": "k1" }),
            priority: 0,
        },
    )
    .await
    .unwrap();

    let created = lifecycle::load_service(&pool, service.id).await.unwrap();
    let first_ref = created.properties["apiKey"].as_str().unwrap().to_string();
    assert!(first_ref.starts_with(vault::VAULT_REF_PREFIX));

    let secret_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vault_secrets WHERE owner_service_id = $1")
        .bind(service.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(secret_count, 1);

    fulcrum_core::job_queue::claim(&pool, agent_id, create_job.id).await.unwrap();
    lifecycle::report_completed(
        &pool,
        &support::agent_identity(agent_id),
        create_job.id,
        Default::default(),
    )
    .await
    .unwrap();

    let (updated, _job) = lifecycle::submit_action(
        &pool,
        &identity,
        service.id,
        "reconfigure",
        json!({ "apiKey": "k2" }),
        0,
    )
    .await
    .unwrap();

    let second_ref = updated.properties["apiKey"].as_str().unwrap().to_string();
    assert_ne!(first_ref, second_ref);

    let reference = uuid::Uuid::parse_str(first_ref.trim_start_matches(vault::VAULT_REF_PREFIX)).unwrap();
    let old_still_present: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vault_secrets WHERE reference = $1")
        .bind(reference)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(old_still_present, 0);

    let second_reference =
        uuid::Uuid::parse_str(second_ref.trim_start_matches(vault::VAULT_REF_PREFIX)).unwrap();

    // Deleting reaches the terminal state and persistent secrets vanish.
    let reconfigure_job = lifecycle::load_job(&pool, _job.id).await.unwrap();
    fulcrum_core::job_queue::claim(&pool, agent_id, reconfigure_job.id).await.unwrap();
    lifecycle::report_completed(
        &pool,
        &support::agent_identity(agent_id),
        reconfigure_job.id,
        Default::default(),
    )
    .await
    .unwrap();
    let (_service, delete_job) =
        lifecycle::submit_action(&pool, &identity, service.id, "delete", json!({}), 0)
            .await
            .unwrap();
    fulcrum_core::job_queue::claim(&pool, agent_id, delete_job.id).await.unwrap();
    lifecycle::report_completed(
        &pool,
        &support::agent_identity(agent_id),
        delete_job.id,
        Default::default(),
    )
    .await
    .unwrap();

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vault_secrets WHERE reference = $1")
        .bind(second_reference)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}
