// key: pool-allocator -> reserve/release typed values from provider pools
//
// A ServicePoolValue's allocation is a mutable foreign key to a service; no
// separate garbage collector exists. Allocation and release always happen
// inside the caller's transaction so they land atomically with the service
// mutation that triggered them.
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use serde_json::Value;
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use crate::models::PoolGeneratorKind;

#[derive(Debug)]
pub struct PoolRow {
    pub id: Uuid,
    pub property_type: String,
    pub generator_kind: PoolGeneratorKind,
    pub generator_config: Value,
}

/// Allocates one free value from the pool of `pool_type` belonging to
/// `pool_set_id`, asserting its declared `propertyType` matches the
/// consuming property, and binds it to `(service_id, property_name)`.
pub async fn allocate(
    tx: &mut Transaction<'_, Postgres>,
    pool_set_id: Uuid,
    pool_type: &str,
    expected_property_type: &str,
    service_id: Uuid,
    property_name: &str,
) -> Result<Value, String> {
    let pool = sqlx::query(
        "SELECT id, property_type, generator_kind, generator_config FROM service_pools \
         WHERE pool_set_id = $1 AND pool_type = $2",
    )
    .bind(pool_set_id)
    .bind(pool_type)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| e.to_string())?
    .ok_or_else(|| format!("no pool of type '{pool_type}' on the assigned agent's pool set"))?;

    let row = PoolRow {
        id: pool.get("id"),
        property_type: pool.get("property_type"),
        generator_kind: pool.get("generator_kind"),
        generator_config: pool.get("generator_config"),
    };

    if row.property_type != expected_property_type {
        return Err(format!(
            "pool '{pool_type}' produces '{}' but property declares '{}'",
            row.property_type, expected_property_type
        ));
    }

    if matches!(row.generator_kind, PoolGeneratorKind::Subnet) {
        ensure_subnet_materialized(tx, row.id, &row.generator_config).await?;
    }

    // Deterministic exclusive selection: lowest `id` among free rows, locked
    // so concurrent allocations never double-assign a value.
    let selected = sqlx::query(
        "SELECT id, value FROM service_pool_values \
         WHERE pool_id = $1 AND service_id IS NULL \
         ORDER BY id ASC LIMIT 1 FOR UPDATE SKIP LOCKED",
    )
    .bind(row.id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| e.to_string())?
    .ok_or_else(|| "no available value".to_string())?;

    let value_id: Uuid = selected.get("id");
    let value: Value = selected.get("value");

    sqlx::query(
        "UPDATE service_pool_values SET service_id = $1, property_name = $2, allocated_at = now() \
         WHERE id = $3",
    )
    .bind(service_id)
    .bind(property_name)
    .bind(value_id)
    .execute(&mut **tx)
    .await
    .map_err(|e| e.to_string())?;

    Ok(value)
}

/// `list`-type pools draw from pre-provisioned rows only; `subnet`-type
/// pools materialize host addresses from a CIDR on demand the first time the
/// pool is drawn from, so the provider need only declare the CIDR.
async fn ensure_subnet_materialized(
    tx: &mut Transaction<'_, Postgres>,
    pool_id: Uuid,
    generator_config: &Value,
) -> Result<(), String> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM service_pool_values WHERE pool_id = $1")
        .bind(pool_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| e.to_string())?;
    if existing > 0 {
        return Ok(());
    }
    let cidr = generator_config
        .get("cidr")
        .and_then(|v| v.as_str())
        .ok_or("subnet pool missing 'cidr' in generatorConfig")?;
    let net: IpNetwork = cidr.parse().map_err(|e| format!("invalid cidr '{cidr}': {e}"))?;
    let addrs: Vec<IpAddr> = match net {
        IpNetwork::V4(v4) => v4.iter().skip(1).map(IpAddr::V4).collect(),
        IpNetwork::V6(v6) => v6.iter().skip(1).map(IpAddr::V6).collect(),
    };

    for ip in addrs {
        sqlx::query(
            "INSERT INTO service_pool_values (id, pool_id, value) VALUES ($1, $2, $3)",
        )
        .bind(Uuid::now_v7())
        .bind(pool_id)
        .bind(Value::String(ip.to_string()))
        .execute(&mut **tx)
        .await
        .map_err(|e| e.to_string())?;
    }
    Ok(())
}

/// Releases every pool value allocated to `service_id`, run in the same
/// transaction that moves a service into a terminal state.
pub async fn release_all(tx: &mut Transaction<'_, Postgres>, service_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE service_pool_values SET service_id = NULL, property_name = NULL, allocated_at = NULL \
         WHERE service_id = $1",
    )
    .bind(service_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
