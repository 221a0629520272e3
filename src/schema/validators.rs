// key: schema-engine -> built-in validators
//
// Validators are named strategies keyed by string `type`, looked up once per
// call from a process-wide table built at first use. The engine never does
// dynamic type dispatch beyond this lookup.
use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

use crate::error::FieldError;

use super::{Operation, PropertyType, SchemaCtx, SchemaValidatorConfig, ValidatorConfig};

#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(
        &self,
        ctx: &SchemaCtx,
        op: Operation,
        path: &str,
        old: &Value,
        new: &Value,
        config: &Value,
    ) -> Vec<FieldError>;
}

static REGISTRY: Lazy<HashMap<&'static str, Box<dyn Validator>>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, Box<dyn Validator>> = HashMap::new();
    m.insert("minLength", Box::new(MinLength));
    m.insert("maxLength", Box::new(MaxLength));
    m.insert("pattern", Box::new(Pattern));
    m.insert("enum", Box::new(Enum));
    m.insert("min", Box::new(Min));
    m.insert("max", Box::new(Max));
    m.insert("minItems", Box::new(MinItems));
    m.insert("maxItems", Box::new(MaxItems));
    m.insert("uniqueItems", Box::new(UniqueItems));
    m.insert("serviceOption", Box::new(ServiceOption));
    m.insert("serviceReference", Box::new(ServiceReference));
    m
});

pub fn registered(kind: &str) -> bool {
    REGISTRY.contains_key(kind)
}

pub async fn run(
    ctx: &SchemaCtx,
    op: Operation,
    path: &str,
    old: &Value,
    new: &Value,
    cfg: &ValidatorConfig,
) -> Vec<FieldError> {
    match REGISTRY.get(cfg.kind.as_str()) {
        Some(v) => v.validate(ctx, op, path, old, new, &cfg.config).await,
        None => vec![FieldError::new(path, format!("unknown validator '{}'", cfg.kind))],
    }
}

/// Process-wide compiled-regex cache, keyed by pattern source.
static PATTERN_CACHE: Lazy<DashMap<String, Regex>> = Lazy::new(DashMap::new);

fn compiled(pattern: &str) -> Result<Regex, String> {
    if let Some(r) = PATTERN_CACHE.get(pattern) {
        return Ok(r.clone());
    }
    let re = Regex::new(pattern).map_err(|e| format!("invalid pattern: {e}"))?;
    PATTERN_CACHE.insert(pattern.to_string(), re.clone());
    Ok(re)
}

/// Numeric parsing accepting every representation found in JSON input:
/// integer types, floats with a zero fractional part, and decimal strings.
/// Integers normalize to i64, decimals to f64.
pub fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

pub fn parse_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 {
                    Some(f as i64)
                } else {
                    None
                }
            } else {
                None
            }
        }
        Value::String(s) => s.parse::<f64>().ok().and_then(|f| {
            if f.fract() == 0.0 {
                Some(f as i64)
            } else {
                None
            }
        }),
        _ => None,
    }
}

/// Type-checks and normalizes a supplied value against a declared property
/// type. Integers normalize to signed 64-bit, decimals to IEEE-754 double.
pub fn check_type(type_: PropertyType, value: &Value) -> Result<Value, String> {
    match type_ {
        PropertyType::String => match value {
            Value::String(_) => Ok(value.clone()),
            _ => Err("expected a string".into()),
        },
        PropertyType::Integer => parse_integer(value)
            .map(|i| Value::Number(i.into()))
            .ok_or_else(|| "expected an integer".into()),
        PropertyType::Number => parse_number(value)
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| "expected a number".into()),
        PropertyType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            _ => Err("expected a boolean".into()),
        },
        PropertyType::Object => match value {
            Value::Object(_) => Ok(value.clone()),
            _ => Err("expected an object".into()),
        },
        PropertyType::Array => match value {
            Value::Array(_) => Ok(value.clone()),
            _ => Err("expected an array".into()),
        },
        PropertyType::Json => Ok(value.clone()),
        PropertyType::Uuid => match value {
            Value::String(s) => Uuid::parse_str(s)
                .map(|_| value.clone())
                .map_err(|_| "expected a UUID string".into()),
            _ => Err("expected a UUID string".into()),
        },
    }
}

struct MinLength;
#[async_trait]
impl Validator for MinLength {
    async fn validate(&self, _c: &SchemaCtx, _o: Operation, path: &str, _old: &Value, new: &Value, cfg: &Value) -> Vec<FieldError> {
        let min = cfg.as_u64().unwrap_or(0) as usize;
        let len = new.as_str().map(|s| s.chars().count()).unwrap_or(0);
        if len < min {
            vec![FieldError::new(path, format!("must be at least {min} characters"))]
        } else {
            vec![]
        }
    }
}

struct MaxLength;
#[async_trait]
impl Validator for MaxLength {
    async fn validate(&self, _c: &SchemaCtx, _o: Operation, path: &str, _old: &Value, new: &Value, cfg: &Value) -> Vec<FieldError> {
        let max = cfg.as_u64().unwrap_or(u64::MAX) as usize;
        let len = new.as_str().map(|s| s.chars().count()).unwrap_or(0);
        if len > max {
            vec![FieldError::new(path, format!("must be at most {max} characters"))]
        } else {
            vec![]
        }
    }
}

struct Pattern;
#[async_trait]
impl Validator for Pattern {
    async fn validate(&self, _c: &SchemaCtx, _o: Operation, path: &str, _old: &Value, new: &Value, cfg: &Value) -> Vec<FieldError> {
        let Some(pattern) = cfg.as_str() else {
            return vec![FieldError::new(path, "pattern validator missing 'config' string")];
        };
        let Some(s) = new.as_str() else {
            return vec![FieldError::new(path, "pattern validator requires a string value")];
        };
        match compiled(pattern) {
            Ok(re) if re.is_match(s) => vec![],
            Ok(_) => vec![FieldError::new(path, format!("does not match pattern '{pattern}'"))],
            Err(e) => vec![FieldError::new(path, e)],
        }
    }
}

struct Enum;
#[async_trait]
impl Validator for Enum {
    async fn validate(&self, _c: &SchemaCtx, _o: Operation, path: &str, _old: &Value, new: &Value, cfg: &Value) -> Vec<FieldError> {
        let allowed = cfg.as_array().cloned().unwrap_or_default();
        if allowed.iter().any(|v| v == new) {
            vec![]
        } else {
            vec![FieldError::new(path, "value is not one of the allowed options")]
        }
    }
}

struct Min;
#[async_trait]
impl Validator for Min {
    async fn validate(&self, _c: &SchemaCtx, _o: Operation, path: &str, _old: &Value, new: &Value, cfg: &Value) -> Vec<FieldError> {
        match (parse_number(cfg), parse_number(new)) {
            (Some(min), Some(n)) if n < min => {
                vec![FieldError::new(path, format!("must be >= {min}"))]
            }
            _ => vec![],
        }
    }
}

struct Max;
#[async_trait]
impl Validator for Max {
    async fn validate(&self, _c: &SchemaCtx, _o: Operation, path: &str, _old: &Value, new: &Value, cfg: &Value) -> Vec<FieldError> {
        match (parse_number(cfg), parse_number(new)) {
            (Some(max), Some(n)) if n > max => {
                vec![FieldError::new(path, format!("must be <= {max}"))]
            }
            _ => vec![],
        }
    }
}

struct MinItems;
#[async_trait]
impl Validator for MinItems {
    async fn validate(&self, _c: &SchemaCtx, _o: Operation, path: &str, _old: &Value, new: &Value, cfg: &Value) -> Vec<FieldError> {
        let min = cfg.as_u64().unwrap_or(0) as usize;
        let len = new.as_array().map(|a| a.len()).unwrap_or(0);
        if len < min {
            vec![FieldError::new(path, format!("must have at least {min} items"))]
        } else {
            vec![]
        }
    }
}

struct MaxItems;
#[async_trait]
impl Validator for MaxItems {
    async fn validate(&self, _c: &SchemaCtx, _o: Operation, path: &str, _old: &Value, new: &Value, cfg: &Value) -> Vec<FieldError> {
        let max = cfg.as_u64().unwrap_or(u64::MAX) as usize;
        let len = new.as_array().map(|a| a.len()).unwrap_or(0);
        if len > max {
            vec![FieldError::new(path, format!("must have at most {max} items"))]
        } else {
            vec![]
        }
    }
}

struct UniqueItems;
#[async_trait]
impl Validator for UniqueItems {
    async fn validate(&self, _c: &SchemaCtx, _o: Operation, path: &str, _old: &Value, new: &Value, _cfg: &Value) -> Vec<FieldError> {
        let Some(items) = new.as_array() else { return vec![] };
        let mut seen = std::collections::HashSet::new();
        for item in items {
            let key = serde_json::to_string(item).unwrap_or_default();
            if !seen.insert(key) {
                return vec![FieldError::new(path, "items must be unique")];
            }
        }
        vec![]
    }
}

/// `config: {optionType: string}`. The value must match an enabled
/// ServiceOption row owned by the provider participant, for that option type.
struct ServiceOption;
#[async_trait]
impl Validator for ServiceOption {
    async fn validate(&self, ctx: &SchemaCtx, _o: Operation, path: &str, _old: &Value, new: &Value, cfg: &Value) -> Vec<FieldError> {
        let Some(option_type) = cfg.get("optionType").and_then(|v| v.as_str()) else {
            return vec![FieldError::new(path, "serviceOption validator missing 'optionType'")];
        };
        let Some(provider) = ctx.provider_participant_id else {
            return vec![FieldError::new(path, "no provider participant in context")];
        };
        let row = sqlx::query(
            "SELECT 1 FROM service_options WHERE participant_id = $1 AND option_type = $2 \
             AND enabled = true AND value = $3",
        )
        .bind(provider)
        .bind(option_type)
        .bind(new)
        .fetch_optional(&ctx.pool)
        .await;
        match row {
            Ok(Some(_)) => vec![],
            Ok(None) => vec![FieldError::new(path, "value is not an enabled service option")],
            Err(e) => vec![FieldError::new(path, format!("option lookup failed: {e}"))],
        }
    }
}

/// `config: {types?: [string], origin?: "consumer"|"group"}`. `new` must be a
/// UUID referring to an existing service. `origin="group"` is resolved
/// against the *referring* service's group (DESIGN.md); `origin="consumer"`
/// against the referring service's consumer participant.
struct ServiceReference;
#[async_trait]
impl Validator for ServiceReference {
    async fn validate(&self, ctx: &SchemaCtx, _o: Operation, path: &str, _old: &Value, new: &Value, cfg: &Value) -> Vec<FieldError> {
        let Some(target) = new.as_str().and_then(|s| Uuid::parse_str(s).ok()) else {
            return vec![FieldError::new(path, "expected a service UUID")];
        };
        let row = sqlx::query(
            "SELECT service_type_id, group_id, consumer_participant_id FROM services WHERE id = $1",
        )
        .bind(target)
        .fetch_optional(&ctx.pool)
        .await;
        let row = match row {
            Ok(Some(r)) => r,
            Ok(None) => return vec![FieldError::new(path, "referenced service does not exist")],
            Err(e) => return vec![FieldError::new(path, format!("reference lookup failed: {e}"))],
        };

        if let Some(types) = cfg.get("types").and_then(|v| v.as_array()) {
            let service_type_id: Uuid = row.get("service_type_id");
            let type_name: Option<String> =
                sqlx::query_scalar("SELECT name FROM service_types WHERE id = $1")
                    .bind(service_type_id)
                    .fetch_optional(&ctx.pool)
                    .await
                    .ok()
                    .flatten();
            let allowed = type_name
                .map(|n| types.iter().any(|t| t.as_str() == Some(n.as_str())))
                .unwrap_or(false);
            if !allowed {
                return vec![FieldError::new(path, "referenced service has an unexpected type")];
            }
        }

        match cfg.get("origin").and_then(|v| v.as_str()) {
            Some("group") => {
                let group_id: Option<Uuid> = row.get("group_id");
                if ctx.referring_group_id.is_none() || group_id != ctx.referring_group_id {
                    return vec![FieldError::new(path, "referenced service is not in the referring group")];
                }
            }
            Some("consumer") => {
                let consumer: Option<Uuid> = row.get("consumer_participant_id");
                if ctx.referring_consumer_participant_id.is_none()
                    || consumer != ctx.referring_consumer_participant_id
                {
                    return vec![FieldError::new(path, "referenced service does not belong to the consumer")];
                }
            }
            _ => {}
        }

        vec![]
    }
}

pub fn schema_validator_registered(kind: &str) -> bool {
    matches!(kind, "exactlyOne" | "uniqueValues")
}

/// Runs schema-level validators over the fully-merged property tree.
pub fn run_schema_validators(
    validators: &[SchemaValidatorConfig],
    merged: &Value,
    errors: &mut Vec<FieldError>,
) {
    for v in validators {
        match v.kind.as_str() {
            "exactlyOne" => {
                let count = v
                    .properties
                    .iter()
                    .filter(|p| merged.get(p.as_str()).map(|x| !x.is_null()).unwrap_or(false))
                    .count();
                if count != 1 {
                    errors.push(FieldError::new(
                        "",
                        format!("exactly one of {:?} must be set (found {count})", v.properties),
                    ));
                }
            }
            "uniqueValues" => {
                let mut seen = std::collections::HashSet::new();
                for p in &v.properties {
                    if let Some(val) = merged.get(p.as_str()) {
                        if val.is_null() {
                            continue;
                        }
                        let key = serde_json::to_string(val).unwrap_or_default();
                        if !seen.insert(key) {
                            errors.push(FieldError::new(
                                "",
                                format!("properties {:?} must carry distinct values", v.properties),
                            ));
                            break;
                        }
                    }
                }
            }
            other => errors.push(FieldError::new("", format!("unknown schema validator '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_parsing_accepts_decimal_strings_with_zero_fraction() {
        assert_eq!(parse_integer(&Value::String("4.0".into())), Some(4));
        assert_eq!(parse_integer(&Value::String("4.5".into())), None);
        assert_eq!(parse_integer(&serde_json::json!(4)), Some(4));
    }

    #[test]
    fn exactly_one_counts_non_null_properties() {
        let merged = serde_json::json!({"a": 1, "b": null});
        let mut errors = Vec::new();
        run_schema_validators(
            &[SchemaValidatorConfig { kind: "exactlyOne".into(), properties: vec!["a".into(), "b".into()], config: Value::Null }],
            &merged,
            &mut errors,
        );
        assert!(errors.is_empty());
    }

    #[test]
    fn unique_values_rejects_duplicates() {
        let merged = serde_json::json!({"a": "x", "b": "x"});
        let mut errors = Vec::new();
        run_schema_validators(
            &[SchemaValidatorConfig { kind: "uniqueValues".into(), properties: vec!["a".into(), "b".into()], config: Value::Null }],
            &merged,
            &mut errors,
        );
        assert_eq!(errors.len(), 1);
    }
}
