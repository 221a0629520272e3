mod support;

use fulcrum_core::agents;
use fulcrum_core::models::Connectivity;
use sqlx::PgPool;

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn discover_picks_the_least_loaded_tag_matching_connected_agent(pool: PgPool) {
    sqlx::migrate!().run(&pool).await.unwrap();

    let participant_id = support::seed_participant(&pool, "acme-cloud").await;
    let agent_type_id = support::seed_agent_type(&pool, "vm-driver").await;

    let busy = support::seed_agent(&pool, participant_id, agent_type_id, "busy").await;
    let idle = support::seed_agent(&pool, participant_id, agent_type_id, "idle").await;
    sqlx::query("UPDATE agents SET connectivity = 'connected', tags = '{eu-west}' WHERE id IN ($1, $2)")
        .bind(busy)
        .bind(idle)
        .execute(&pool)
        .await
        .unwrap();

    // give `busy` a pending job so `idle` is strictly less loaded
    let service_type_id = {
        let schema = serde_json::json!({ "properties": {}, "validators": [] });
        let lifecycle = serde_json::json!({
            "states": ["New"], "initialState": "New", "terminalStates": [], "runningStates": [], "actions": {}
        });
        support::seed_service_type(&pool, "noop", &schema, &lifecycle).await
    };
    let service_id = uuid::Uuid::now_v7();
    sqlx::query(
        "INSERT INTO services (id, name, service_type_id, agent_id, status) VALUES ($1, 'svc', $2, $3, 'New')",
    )
    .bind(service_id)
    .bind(service_type_id)
    .bind(busy)
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO jobs (id, service_id, agent_id, action, state) VALUES ($1, $2, $3, 'create', 'pending')")
        .bind(uuid::Uuid::now_v7())
        .bind(service_id)
        .bind(busy)
        .execute(&pool)
        .await
        .unwrap();

    let picked = agents::discover(&pool, agent_type_id, &["eu-west".to_string()]).await.unwrap();
    assert_eq!(picked.id, idle);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn discover_excludes_agents_missing_a_requested_tag(pool: PgPool) {
    sqlx::migrate!().run(&pool).await.unwrap();

    let participant_id = support::seed_participant(&pool, "acme-cloud").await;
    let agent_type_id = support::seed_agent_type(&pool, "vm-driver").await;
    let agent_id = support::seed_agent(&pool, participant_id, agent_type_id, "only-us-east").await;
    sqlx::query("UPDATE agents SET connectivity = 'connected', tags = '{us-east}' WHERE id = $1")
        .bind(agent_id)
        .execute(&pool)
        .await
        .unwrap();

    let result = agents::discover(&pool, agent_type_id, &["eu-west".to_string()]).await;
    assert!(result.is_err());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn reap_stale_disconnects_past_timeout_but_leaves_disabled_agents_alone(pool: PgPool) {
    sqlx::migrate!().run(&pool).await.unwrap();

    let participant_id = support::seed_participant(&pool, "acme-cloud").await;
    let agent_type_id = support::seed_agent_type(&pool, "vm-driver").await;
    let stale = support::seed_agent(&pool, participant_id, agent_type_id, "stale").await;
    let disabled = support::seed_agent(&pool, participant_id, agent_type_id, "disabled").await;

    sqlx::query(
        "UPDATE agents SET connectivity = 'connected', last_status_update_at = now() - interval '1 hour' WHERE id = $1",
    )
    .bind(stale)
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "UPDATE agents SET connectivity = 'disabled', last_status_update_at = now() - interval '1 hour' WHERE id = $1",
    )
    .bind(disabled)
    .execute(&pool)
    .await
    .unwrap();

    let reaped = agents::reap_stale(&pool, chrono::Duration::minutes(5)).await.unwrap();
    assert_eq!(reaped, 1);

    let stale_agent = sqlx::query_as::<_, fulcrum_core::models::Agent>(
        "SELECT id, name, participant_id, agent_type_id, connectivity, token_hash, tags, configuration, \
         service_pool_set_id, last_status_update_at, created_at, updated_at FROM agents WHERE id = $1",
    )
    .bind(stale)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(stale_agent.connectivity, Connectivity::Disconnected);

    let disabled_agent = sqlx::query_as::<_, fulcrum_core::models::Agent>(
        "SELECT id, name, participant_id, agent_type_id, connectivity, token_hash, tags, configuration, \
         service_pool_set_id, last_status_update_at, created_at, updated_at FROM agents WHERE id = $1",
    )
    .bind(disabled)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(disabled_agent.connectivity, Connectivity::Disabled);
}
