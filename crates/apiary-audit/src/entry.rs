use apiary_core::{ApiaryError, ApiaryResult};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// `prev_hash` of the first entry in every chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One signed, hash-linked audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Unique entry id.
    pub id: String,
    /// Event time, epoch milliseconds.
    pub at: i64,
    /// Lifecycle event type (e.g. `task_send_success`).
    pub event_type: String,
    /// Who caused the event (an agent id).
    pub actor: String,
    /// Structured event payload.
    pub payload: Value,
    /// Hash of the previous entry; [`GENESIS_HASH`] for the first.
    pub prev_hash: String,
    /// SHA-256 over `prev_hash ‖ canonical(entry)`, hex-encoded.
    pub hash: String,
    /// HMAC-SHA256 over `hash|key_id`, hex-encoded.
    pub signature: String,
    /// Identifier of the signing key.
    pub key_id: String,
}

/// The caller-supplied part of an entry, before linking and signing.
#[derive(Debug, Clone)]
pub struct AuditDraft {
    /// Lifecycle event type.
    pub event_type: String,
    /// Who caused the event.
    pub actor: String,
    /// Structured event payload.
    pub payload: Value,
    /// Event time; the log's clock is used when absent.
    pub at: Option<i64>,
}

impl AuditDraft {
    /// Creates a draft with an empty payload.
    pub fn new(event_type: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            actor: actor.into(),
            payload: json!({}),
            at: None,
        }
    }

    /// Attaches the payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Pins the event time.
    pub fn at(mut self, at_ms: i64) -> Self {
        self.at = Some(at_ms);
        self
    }
}

/// Renders a JSON value into a canonical string: object keys sorted
/// recursively, no insignificant whitespace. Two structurally equal values
/// always canonicalize identically, which makes the hash reproducible.
pub fn canonicalize(value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .iter()
                .map(|key| {
                    let rendered = map.get(*key).map_or_else(|| "null".to_owned(), canonicalize);
                    format!("{}:{}", Value::String((*key).clone()), rendered)
                })
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        other => other.to_string(),
    }
}

fn canonical_base(entry_id: &str, at: i64, draft_like: &AuditEntryFields<'_>) -> String {
    canonicalize(&json!({
        "id": entry_id,
        "at": at,
        "eventType": draft_like.event_type,
        "actor": draft_like.actor,
        "payload": draft_like.payload,
        "prevHash": draft_like.prev_hash,
        "keyId": draft_like.key_id,
    }))
}

struct AuditEntryFields<'a> {
    event_type: &'a str,
    actor: &'a str,
    payload: &'a Value,
    prev_hash: &'a str,
    key_id: &'a str,
}

fn compute_hash(prev_hash: &str, canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn compute_signature(secret: &str, hash: &str, key_id: &str) -> ApiaryResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ApiaryError::Audit("invalid signing secret".to_owned()))?;
    mac.update(format!("{hash}|{key_id}").as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Links, hashes, and signs a draft into a storable entry.
pub fn sign_entry(
    draft: &AuditDraft,
    secret: &str,
    key_id: &str,
    prev_hash: &str,
    default_at: i64,
) -> ApiaryResult<AuditEntry> {
    if secret.is_empty() {
        return Err(ApiaryError::Audit(
            "signing requires a non-empty secret".to_owned(),
        ));
    }
    if draft.event_type.trim().is_empty() {
        return Err(ApiaryError::Audit("eventType must be non-empty".to_owned()));
    }

    let id = Uuid::new_v4().to_string();
    let at = draft.at.unwrap_or(default_at);
    let canonical = canonical_base(
        &id,
        at,
        &AuditEntryFields {
            event_type: &draft.event_type,
            actor: &draft.actor,
            payload: &draft.payload,
            prev_hash,
            key_id,
        },
    );
    let hash = compute_hash(prev_hash, &canonical);
    let signature = compute_signature(secret, &hash, key_id)?;

    Ok(AuditEntry {
        id,
        at,
        event_type: draft.event_type.clone(),
        actor: draft.actor.clone(),
        payload: draft.payload.clone(),
        prev_hash: prev_hash.to_owned(),
        hash,
        signature,
        key_id: key_id.to_owned(),
    })
}

/// Outcome of verifying a single entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryVerification {
    /// Hash and signature both check out.
    Ok,
    /// The entry does not link to the expected previous hash.
    PrevHashMismatch,
    /// The stored hash does not match a recomputation.
    HashMismatch,
    /// The signature does not verify under the secret.
    SignatureMismatch,
}

impl EntryVerification {
    /// Short reason string for reporting.
    pub fn reason(&self) -> &'static str {
        match self {
            EntryVerification::Ok => "ok",
            EntryVerification::PrevHashMismatch => "prev_hash_mismatch",
            EntryVerification::HashMismatch => "hash_mismatch",
            EntryVerification::SignatureMismatch => "signature_mismatch",
        }
    }
}

/// Re-derives one entry's hash and signature.
///
/// The signature comparison is constant-time (via the MAC's own verify).
pub fn verify_entry(
    entry: &AuditEntry,
    secret: &str,
    expected_prev_hash: &str,
) -> ApiaryResult<EntryVerification> {
    if secret.is_empty() {
        return Err(ApiaryError::Audit(
            "verification requires a non-empty secret".to_owned(),
        ));
    }

    if entry.prev_hash != expected_prev_hash {
        return Ok(EntryVerification::PrevHashMismatch);
    }

    let canonical = canonical_base(
        &entry.id,
        entry.at,
        &AuditEntryFields {
            event_type: &entry.event_type,
            actor: &entry.actor,
            payload: &entry.payload,
            prev_hash: &entry.prev_hash,
            key_id: &entry.key_id,
        },
    );
    if compute_hash(&entry.prev_hash, &canonical) != entry.hash {
        return Ok(EntryVerification::HashMismatch);
    }

    let Ok(signature_bytes) = hex::decode(&entry.signature) else {
        return Ok(EntryVerification::SignatureMismatch);
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ApiaryError::Audit("invalid signing secret".to_owned()))?;
    mac.update(format!("{}|{}", entry.hash, entry.key_id).as_bytes());
    if mac.verify_slice(&signature_bytes).is_err() {
        return Ok(EntryVerification::SignatureMismatch);
    }

    Ok(EntryVerification::Ok)
}
