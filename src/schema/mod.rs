// key: schema-engine -> property tree validation, defaulting, generation, secrets
//
// A Schema is data: a map of PropertyDefinitions plus a list of schema-level
// validators. `apply_create`/`apply_update` walk that tree once, in
// declaration order, producing a final property Value or a collected list of
// FieldErrors. Nothing here does dynamic type dispatch beyond a string-keyed
// lookup into the validator/generator registries built in `validators.rs`
// and `generators.rs`.
pub mod generators;
pub mod validators;

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::FieldError;
use crate::vault;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    Json,
    Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretKind {
    Persistent,
    Ephemeral,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretConfig {
    #[serde(rename = "type")]
    pub kind: SecretKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: Value,
}

/// `actor:[system]` style gate on who may *supply* a value for a property.
/// Absence means any actor may set it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Authorizer {
    pub actor: Vec<Actor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    System,
    User,
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDefinition {
    #[serde(rename = "type")]
    pub type_: PropertyType,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub immutable: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub secret: Option<SecretConfig>,
    #[serde(default)]
    pub generator: Option<GeneratorConfig>,
    #[serde(default)]
    pub validators: Vec<ValidatorConfig>,
    #[serde(default)]
    pub authorizers: Vec<Authorizer>,
    #[serde(default)]
    pub properties: Option<IndexMap<String, PropertyDefinition>>,
    #[serde(default)]
    pub items: Option<Box<PropertyDefinition>>,
}

impl PropertyDefinition {
    /// Whether `actor` is permitted to supply this property directly. An
    /// empty authorizer list permits everyone.
    pub fn permits(&self, actor: Actor) -> bool {
        if self.authorizers.is_empty() {
            return true;
        }
        self.authorizers.iter().any(|a| a.actor.contains(&actor))
    }

    pub fn is_system_generated(&self) -> bool {
        self.generator.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaValidatorConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub properties: Vec<String>,
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Schema {
    pub properties: IndexMap<String, PropertyDefinition>,
    #[serde(default)]
    pub validators: Vec<SchemaValidatorConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
}

/// Everything a validator/generator might need about the caller and the
/// service the properties belong to. Cheap to clone (PgPool is an Arc
/// internally); passed by reference to every recursive call.
#[derive(Clone)]
pub struct SchemaCtx {
    pub pool: PgPool,
    pub actor: Actor,
    pub service_id: Uuid,
    pub agent_id: Uuid,
    pub provider_participant_id: Option<Uuid>,
    /// Resolved per DESIGN.md: `serviceReference.origin=group` matches the
    /// *referring* service's group, so the referring service supplies it.
    pub referring_group_id: Option<Uuid>,
    pub referring_consumer_participant_id: Option<Uuid>,
}

pub async fn apply_create(
    tx: &mut Transaction<'_, Postgres>,
    ctx: &SchemaCtx,
    schema: &Schema,
    new_props: &Value,
) -> Result<Value, Vec<FieldError>> {
    apply(tx, ctx, Operation::Create, schema, &Value::Null, new_props).await
}

pub async fn apply_update(
    tx: &mut Transaction<'_, Postgres>,
    ctx: &SchemaCtx,
    schema: &Schema,
    old_props: &Value,
    new_props: &Value,
) -> Result<Value, Vec<FieldError>> {
    apply(tx, ctx, Operation::Update, schema, old_props, new_props).await
}

async fn apply(
    tx: &mut Transaction<'_, Postgres>,
    ctx: &SchemaCtx,
    op: Operation,
    schema: &Schema,
    old_props: &Value,
    new_props: &Value,
) -> Result<Value, Vec<FieldError>> {
    let (merged, mut errors) =
        apply_object(tx, ctx, op, &schema.properties, old_props, new_props, "").await;

    validators::run_schema_validators(&schema.validators, &merged, &mut errors);

    if errors.is_empty() {
        Ok(merged)
    } else {
        Err(errors)
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Recursively applies a map of PropertyDefinitions against an old/new JSON
/// object, in the map's declaration order (Testable Property 6). Boxed to
/// allow unbounded object nesting from a plain `async fn`.
fn apply_object<'a>(
    tx: &'a mut Transaction<'_, Postgres>,
    ctx: &'a SchemaCtx,
    op: Operation,
    props: &'a IndexMap<String, PropertyDefinition>,
    old_obj: &'a Value,
    new_obj: &'a Value,
    path: &'a str,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = (Value, Vec<FieldError>)> + 'a + Send>> {
    Box::pin(async move {
        let mut errors = Vec::new();
        let mut out = serde_json::Map::new();

        for (name, def) in props.iter() {
            let prop_path = join_path(path, name);
            let old_val = old_obj.get(name).cloned().unwrap_or(Value::Null);
            let new_supplied = new_obj.get(name);

            // 1. system-generated properties reject a caller-supplied value.
            if def.is_system_generated() {
                if let Some(v) = new_supplied {
                    if !v.is_null() {
                        errors.push(FieldError::new(
                            &prop_path,
                            "property is system-generated and cannot be supplied",
                        ));
                        continue;
                    }
                }
            }

            // 2. pass-through of an unresolved vault reference.
            if def.secret.is_some() {
                if let Some(r) = vault::as_vault_ref(&old_val) {
                    if let Some(new_v) = new_supplied {
                        if vault::as_vault_ref(new_v) == Some(r) {
                            out.insert(name.clone(), new_v.clone());
                            continue;
                        }
                    }
                }
            }

            let mut new_val = new_supplied.cloned().unwrap_or(Value::Null);

            // 3. immutability.
            if op == Operation::Update
                && def.immutable
                && !old_val.is_null()
                && !new_val.is_null()
                && old_val != new_val
            {
                errors.push(FieldError::conflict(&prop_path, "property is immutable"));
                continue;
            }
            if op == Operation::Update && new_val.is_null() {
                // Update leaves unsupplied properties untouched.
                new_val = old_val.clone();
            }

            if !new_val.is_null() {
                if !def.permits(ctx.actor) && new_supplied.map(|v| !v.is_null()).unwrap_or(false) {
                    errors.push(FieldError::new(
                        &prop_path,
                        format!("actor {:?} is not authorized to set this property", ctx.actor),
                    ));
                    continue;
                }
                match validators::check_type(def.type_, &new_val) {
                    Ok(normalized) => {
                        new_val = normalized;
                        let mut field_errs = Vec::new();
                        for v in &def.validators {
                            field_errs.extend(
                                validators::run(ctx, op, &prop_path, &old_val, &new_val, v).await,
                            );
                        }
                        errors.extend(field_errs);
                    }
                    Err(msg) => {
                        errors.push(FieldError::new(&prop_path, msg));
                        continue;
                    }
                }
            } else {
                // 5. default, then generator.
                if let Some(default) = &def.default {
                    new_val = default.clone();
                    if let Err(msg) = validators::check_type(def.type_, &new_val).map(|_| ()) {
                        errors.push(FieldError::new(&prop_path, msg));
                        continue;
                    }
                } else if let Some(gen) = &def.generator {
                    match generators::run(tx, ctx, &prop_path, name, def, gen).await {
                        Ok(v) => new_val = v,
                        Err(msg) => {
                            errors.push(FieldError::new(&prop_path, msg));
                            continue;
                        }
                    }
                } else if def.required {
                    errors.push(FieldError::new(&prop_path, "property is required"));
                    continue;
                }
            }

            // 6. recurse into nested structures.
            if !new_val.is_null() {
                match def.type_ {
                    PropertyType::Object => {
                        if let Some(nested) = &def.properties {
                            let (merged, nested_errs) = apply_object(
                                tx,
                                ctx,
                                op,
                                nested,
                                &old_val,
                                &new_val,
                                &prop_path,
                            )
                            .await;
                            errors.extend(nested_errs);
                            new_val = merged;
                        }
                    }
                    PropertyType::Array => {
                        if let Some(item_def) = &def.items {
                            let (merged, nested_errs) =
                                apply_array(tx, ctx, op, item_def, &old_val, &new_val, &prop_path)
                                    .await;
                            errors.extend(nested_errs);
                            new_val = merged;
                        }
                    }
                    _ => {}
                }
            }

            // 7. secret substitution: only leaves can be secret (enforced at
            // structural-validation time), so this runs after recursion.
            if let Some(secret) = &def.secret {
                if !new_val.is_null() && vault::as_vault_ref(&new_val).is_none() {
                    let previous = vault::as_vault_ref(&old_val).map(|s| s.to_string());
                    match vault::rotate(tx, ctx.service_id, &prop_path, secret.kind, &new_val, previous)
                        .await
                    {
                        Ok(reference) => new_val = Value::String(reference),
                        Err(e) => {
                            errors.push(FieldError::new(&prop_path, format!("vault write failed: {e}")));
                            continue;
                        }
                    }
                }
            }

            out.insert(name.clone(), new_val);
        }

        (Value::Object(out), errors)
    })
}

fn apply_array<'a>(
    tx: &'a mut Transaction<'_, Postgres>,
    ctx: &'a SchemaCtx,
    op: Operation,
    item_def: &'a PropertyDefinition,
    old_arr: &'a Value,
    new_arr: &'a Value,
    path: &'a str,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = (Value, Vec<FieldError>)> + 'a + Send>> {
    Box::pin(async move {
        let items = new_arr.as_array().cloned().unwrap_or_default();
        let old_items = old_arr.as_array().cloned().unwrap_or_default();
        let mut errors = Vec::new();
        let mut out = Vec::with_capacity(items.len());

        for (i, item) in items.iter().enumerate() {
            let item_path = format!("{path}[{i}]");
            let old_item = old_items.get(i).cloned().unwrap_or(Value::Null);
            match item_def.type_ {
                PropertyType::Object => {
                    if let Some(nested) = &item_def.properties {
                        let wrapped_old = old_item;
                        let (merged, nested_errs) =
                            apply_object(tx, ctx, op, nested, &wrapped_old, item, &item_path).await;
                        errors.extend(nested_errs);
                        out.push(merged);
                        continue;
                    }
                }
                _ => {}
            }
            match validators::check_type(item_def.type_, item) {
                Ok(v) => out.push(v),
                Err(msg) => errors.push(FieldError::new(&item_path, msg)),
            }
        }

        (Value::Array(out), errors)
    })
}

/// Structural validation, run once before a ServiceType/AgentType schema is
/// first used (and exposed as the `/service-types/{id}/validate` dry run).
/// Checks that every validator/generator type is registered and accepts its
/// config, that defaults type-check, and that only primitive leaves may be
/// secret.
pub fn validate_structure(schema: &Schema) -> Vec<FieldError> {
    let mut errors = Vec::new();
    validate_props(&schema.properties, "", &mut errors);
    for sv in &schema.validators {
        if !validators::schema_validator_registered(&sv.kind) {
            errors.push(FieldError::new("", format!("unknown schema validator '{}'", sv.kind)));
        }
    }
    errors
}

fn validate_props(props: &IndexMap<String, PropertyDefinition>, path: &str, errors: &mut Vec<FieldError>) {
    let mut seen = HashSet::new();
    for (name, def) in props.iter() {
        if !seen.insert(name.clone()) {
            errors.push(FieldError::new(path, format!("duplicate property '{name}'")));
        }
        let prop_path = join_path(path, name);

        if matches!(def.type_, PropertyType::Object | PropertyType::Array) && def.secret.is_some() {
            errors.push(FieldError::new(&prop_path, "object/array properties cannot be secret"));
        }

        if let Some(default) = &def.default {
            if let Err(msg) = validators::check_type(def.type_, default) {
                errors.push(FieldError::new(&prop_path, format!("default value {msg}")));
            }
        }

        for v in &def.validators {
            if !validators::registered(&v.kind) {
                errors.push(FieldError::new(&prop_path, format!("unknown validator '{}'", v.kind)));
            }
        }
        if let Some(gen) = &def.generator {
            if !generators::registered(&gen.kind) {
                errors.push(FieldError::new(&prop_path, format!("unknown generator '{}'", gen.kind)));
            }
        }

        match def.type_ {
            PropertyType::Object => {
                if let Some(nested) = &def.properties {
                    validate_props(nested, &prop_path, errors);
                }
            }
            PropertyType::Array => {
                if let Some(item) = &def.items {
                    if item.secret.is_some() {
                        errors.push(FieldError::new(&prop_path, "array item definitions cannot be secret"));
                    }
                    if let Some(nested) = &item.properties {
                        validate_props(nested, &format!("{prop_path}[]"), errors);
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(type_: PropertyType) -> PropertyDefinition {
        PropertyDefinition {
            type_,
            label: None,
            required: false,
            immutable: false,
            default: None,
            secret: None,
            generator: None,
            validators: vec![],
            authorizers: vec![],
            properties: None,
            items: None,
        }
    }

    #[test]
    fn structural_validation_rejects_secret_object() {
        let mut props = IndexMap::new();
        let mut obj = leaf(PropertyType::Object);
        obj.secret = Some(SecretConfig { kind: SecretKind::Persistent });
        props.insert("cfg".to_string(), obj);
        let schema = Schema { properties: props, validators: vec![] };
        let errors = validate_structure(&schema);
        assert!(errors.iter().any(|e| e.message.contains("cannot be secret")));
    }

    #[test]
    fn structural_validation_rejects_unknown_validator() {
        let mut props = IndexMap::new();
        let mut p = leaf(PropertyType::String);
        p.validators.push(ValidatorConfig { kind: "notreal".into(), config: Value::Null });
        props.insert("name".to_string(), p);
        let schema = Schema { properties: props, validators: vec![] };
        let errors = validate_structure(&schema);
        assert!(errors.iter().any(|e| e.message.contains("unknown validator")));
    }
}
