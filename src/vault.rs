// key: vault -> authenticated symmetric encryption of secret property values
//
// Ciphertext is produced by AES-256-GCM with a random 96-bit nonce per
// write; the nonce is stored alongside the ciphertext. The key is loaded
// once from `FULCRUM_VAULT_ENCRYPTION_KEY` (32 raw bytes, base64). All
// cleanup paths are best-effort: a failure is logged and never fails the
// enclosing operation.
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as Base64Engine;
use base64::Engine as _;
use once_cell::sync::Lazy;
use rand::RngCore;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::config;
use crate::schema::SecretKind;

pub const VAULT_REF_PREFIX: &str = "vault://";

/// Returns the opaque reference string if `value` is a `vault://...` tag.
pub fn as_vault_ref(value: &Value) -> Option<&str> {
    value.as_str().and_then(|s| s.strip_prefix(VAULT_REF_PREFIX))
}

pub fn tag(reference: Uuid) -> String {
    format!("{VAULT_REF_PREFIX}{reference}")
}

static CIPHER: Lazy<Aes256Gcm> = Lazy::new(|| {
    let raw = Base64Engine.decode(config::VAULT_ENCRYPTION_KEY.as_str())
        .expect("FULCRUM_VAULT_ENCRYPTION_KEY must be valid base64");
    assert_eq!(raw.len(), 32, "FULCRUM_VAULT_ENCRYPTION_KEY must decode to 32 bytes");
    let key = Key::<Aes256Gcm>::from_slice(&raw);
    Aes256Gcm::new(key)
});

fn encrypt(plaintext: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = CIPHER
        .encrypt(nonce, plaintext)
        .expect("AES-256-GCM encryption cannot fail for well-formed input");
    (ciphertext, nonce_bytes.to_vec())
}

fn decrypt(ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>, String> {
    let nonce = Nonce::from_slice(nonce);
    CIPHER
        .decrypt(nonce, ciphertext)
        .map_err(|_| "vault ciphertext failed to authenticate".to_string())
}

/// Saves `value` under a fresh reference, deletes the previous reference
/// (rotation) best-effort, and returns the new `vault://<ref>` tag.
pub async fn rotate(
    tx: &mut Transaction<'_, Postgres>,
    owner_service_id: Uuid,
    property_path: &str,
    kind: SecretKind,
    value: &Value,
    previous_ref: Option<String>,
) -> Result<String, String> {
    let reference = Uuid::now_v7();
    let plaintext = serde_json::to_vec(value).map_err(|e| e.to_string())?;
    let (ciphertext, nonce) = encrypt(&plaintext);

    sqlx::query(
        "INSERT INTO vault_secrets (reference, ciphertext, nonce, secret_type, property_path, owner_service_id) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(reference)
    .bind(&ciphertext)
    .bind(&nonce)
    .bind(kind)
    .bind(property_path)
    .bind(owner_service_id)
    .execute(&mut **tx)
    .await
    .map_err(|e| e.to_string())?;

    if let Some(prev) = previous_ref {
        if let Ok(prev_uuid) = Uuid::parse_str(&prev) {
            if let Err(e) = sqlx::query("DELETE FROM vault_secrets WHERE reference = $1")
                .bind(prev_uuid)
                .execute(&mut **tx)
                .await
            {
                tracing::warn!(error = %e, reference = %prev_uuid, "best-effort vault rotation delete failed");
            }
        }
    }

    Ok(tag(reference))
}

/// Resolves a `vault://<ref>` tag to cleartext JSON. Only ever called at
/// agent-facing read endpoints, never during schema validation.
pub async fn get(pool: &PgPool, reference: Uuid) -> Result<Value, String> {
    let row = sqlx::query_as::<_, (Vec<u8>, Vec<u8>)>(
        "SELECT ciphertext, nonce FROM vault_secrets WHERE reference = $1",
    )
    .bind(reference)
    .fetch_optional(pool)
    .await
    .map_err(|e| e.to_string())?
    .ok_or("vault reference not found")?;

    let plaintext = decrypt(&row.0, &row.1)?;
    serde_json::from_slice(&plaintext).map_err(|e| e.to_string())
}

/// Ephemeral cleanup: deletes every ephemeral vault record owned by
/// `service_id`. Run after every job completion (Completed or Failed).
pub async fn delete_ephemeral(pool: &PgPool, service_id: Uuid) {
    let result = sqlx::query(
        "DELETE FROM vault_secrets WHERE owner_service_id = $1 AND secret_type = 'ephemeral'",
    )
    .bind(service_id)
    .execute(pool)
    .await;
    if let Err(e) = result {
        tracing::warn!(error = %e, %service_id, "best-effort ephemeral vault cleanup failed");
    }
}

/// Persistent cleanup: deletes every vault record owned by `service_id`
/// (the service has just reached a terminal state).
pub async fn delete_persistent(tx: &mut Transaction<'_, Postgres>, service_id: Uuid) {
    let result = sqlx::query("DELETE FROM vault_secrets WHERE owner_service_id = $1")
        .bind(service_id)
        .execute(&mut **tx)
        .await;
    if let Err(e) = result {
        tracing::warn!(error = %e, %service_id, "best-effort persistent vault cleanup failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vault_ref_round_trips_through_tag() {
        let id = Uuid::now_v7();
        let tagged = tag(id);
        assert_eq!(as_vault_ref(&Value::String(tagged)), Some(id.to_string().as_str()));
    }

    #[test]
    fn plain_values_are_not_vault_refs() {
        assert_eq!(as_vault_ref(&Value::String("plain".into())), None);
    }

    #[test]
    fn encrypt_then_decrypt_recovers_plaintext() {
        std::env::set_var("FULCRUM_VAULT_ENCRYPTION_KEY", Base64Engine.encode([7u8; 32]));
        let (ct, nonce) = encrypt(b"hello secret");
        let pt = decrypt(&ct, &nonce).unwrap();
        assert_eq!(pt, b"hello secret");
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        std::env::set_var("FULCRUM_VAULT_ENCRYPTION_KEY", Base64Engine.encode([7u8; 32]));
        let (mut ct, nonce) = encrypt(b"hello secret");
        ct[0] ^= 0xFF;
        assert!(decrypt(&ct, &nonce).is_err());
    }
}
