use crate::entry::{sign_entry, verify_entry, AuditDraft, AuditEntry, EntryVerification, GENESIS_HASH};
use apiary_core::{ApiaryError, ApiaryResult, Clock, SystemClock};
use apiary_store::JsonlLedger;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Outcome of verifying a whole chain. Fails closed at the first bad entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
    /// Whether every entry verified.
    pub ok: bool,
    /// Index of the first entry that failed, when any did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<usize>,
    /// Why that entry failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Number of entries verified (all of them on success).
    pub count: usize,
}

/// Verifies a chain of entries in order under the given secret.
///
/// Callers must treat the log as untrusted from `failed_at` onward: a
/// mutation to any entry breaks its own hash and the link of every
/// subsequent entry.
pub fn verify_chain(entries: &[AuditEntry], secret: &str) -> ApiaryResult<ChainVerification> {
    let mut expected_prev = GENESIS_HASH.to_owned();
    for (index, entry) in entries.iter().enumerate() {
        let verification = verify_entry(entry, secret, &expected_prev)?;
        if verification != EntryVerification::Ok {
            return Ok(ChainVerification {
                ok: false,
                failed_at: Some(index),
                reason: Some(verification.reason().to_owned()),
                count: index,
            });
        }
        expected_prev = entry.hash.clone();
    }
    Ok(ChainVerification {
        ok: true,
        failed_at: None,
        reason: None,
        count: entries.len(),
    })
}

/// JSONL persistence for audit entries.
///
/// Like the task journal, loading skips unparseable lines so partial
/// corruption does not block incident review; chain verification is what
/// decides trust.
pub struct FileAuditLogStore {
    ledger: JsonlLedger,
}

impl FileAuditLogStore {
    /// Creates a store writing to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            ledger: JsonlLedger::new(path),
        }
    }

    /// Appends one signed entry.
    pub async fn append(&self, entry: &AuditEntry) -> ApiaryResult<()> {
        self.ledger.append(entry).await
    }

    /// Loads every parseable entry in file order.
    pub async fn load_entries(&self) -> ApiaryResult<Vec<AuditEntry>> {
        self.ledger.load().await
    }
}

/// Append-only, hash-chained, HMAC-signed audit log.
pub struct SignedAuditLog {
    secret: String,
    key_id: String,
    clock: Arc<dyn Clock>,
    entries: Vec<AuditEntry>,
    store: Option<FileAuditLogStore>,
}

impl SignedAuditLog {
    /// Creates a log signing with `secret`. The secret must be non-empty.
    pub fn new(secret: impl Into<String>) -> ApiaryResult<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(ApiaryError::Audit(
                "audit log requires a non-empty secret".to_owned(),
            ));
        }
        Ok(Self {
            secret,
            key_id: "default".to_owned(),
            clock: Arc::new(SystemClock),
            entries: Vec::new(),
            store: None,
        })
    }

    /// Sets the key identifier recorded on each entry.
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = key_id.into();
        self
    }

    /// Injects a clock (tests, simulations).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Writes every appended entry through to a file store.
    pub fn with_store(mut self, store: FileAuditLogStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Links, signs, stores, and returns a new entry.
    pub async fn append(&mut self, draft: AuditDraft) -> ApiaryResult<AuditEntry> {
        let prev_hash = self
            .entries
            .last()
            .map_or_else(|| GENESIS_HASH.to_owned(), |last| last.hash.clone());
        let entry = sign_entry(
            &draft,
            &self.secret,
            &self.key_id,
            &prev_hash,
            self.clock.now_ms(),
        )?;

        if let Some(store) = &self.store {
            store.append(&entry).await?;
        }
        self.entries.push(entry.clone());
        Ok(entry)
    }

    /// The in-memory chain, oldest first.
    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    /// Number of entries in the chain.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Verifies the in-memory chain.
    pub fn verify(&self) -> ApiaryResult<ChainVerification> {
        verify_chain(&self.entries, &self.secret)
    }

    /// Verifies an externally supplied chain under this log's secret.
    pub fn verify_entries(&self, entries: &[AuditEntry]) -> ApiaryResult<ChainVerification> {
        verify_chain(entries, &self.secret)
    }

    /// Replaces the in-memory chain with the store's contents.
    ///
    /// Returns the number of loaded entries. Loading does not verify;
    /// call [`SignedAuditLog::verify`] before trusting the history.
    pub async fn hydrate(&mut self) -> ApiaryResult<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let entries = store.load_entries().await?;
        info!(count = entries.len(), "audit log hydrated from store");
        self.entries = entries;
        Ok(self.entries.len())
    }
}
