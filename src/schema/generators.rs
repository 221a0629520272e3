// key: schema-engine -> generators (system-supplied values)
//
// `default` is handled inline in `mod.rs` (it is not a plug-in; it's the
// absence of one). The only registered generator type is `pool`, which
// delegates to the pool allocator.
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Postgres, Transaction};

use super::{GeneratorConfig, PropertyDefinition, SchemaCtx};
use crate::pool;

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ctx: &SchemaCtx,
        property_name: &str,
        prop: &PropertyDefinition,
        config: &Value,
    ) -> Result<Value, String>;
}

pub fn registered(kind: &str) -> bool {
    kind == "pool"
}

pub async fn run(
    tx: &mut Transaction<'_, Postgres>,
    ctx: &SchemaCtx,
    _path: &str,
    property_name: &str,
    prop: &PropertyDefinition,
    cfg: &GeneratorConfig,
) -> Result<Value, String> {
    match cfg.kind.as_str() {
        "pool" => PoolGenerator.generate(tx, ctx, property_name, prop, &cfg.config).await,
        other => Err(format!("unknown generator '{other}'")),
    }
}

struct PoolGenerator;

#[async_trait]
impl Generator for PoolGenerator {
    async fn generate(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ctx: &SchemaCtx,
        property_name: &str,
        prop: &PropertyDefinition,
        config: &Value,
    ) -> Result<Value, String> {
        let pool_type = config
            .get("poolType")
            .and_then(|v| v.as_str())
            .ok_or("pool generator missing 'poolType'")?;

        let property_type = serde_json::to_value(prop.type_)
            .ok()
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_default();

        let pool_set_id: Option<uuid::Uuid> = sqlx::query_scalar(
            "SELECT service_pool_set_id FROM agents WHERE id = $1",
        )
        .bind(ctx.agent_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| e.to_string())?
        .flatten();

        let pool_set_id = pool_set_id.ok_or("assigned agent has no service pool set")?;

        pool::allocate(tx, pool_set_id, pool_type, &property_type, ctx.service_id, property_name).await
    }
}
