use crate::ledger::JsonlLedger;
use apiary_core::{ApiaryError, ApiaryResult, Clock, SystemClock};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// A record that can live in the task journal, keyed by its task id.
pub trait JournalRecord: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// The journal key. One live record per key.
    fn journal_key(&self) -> &str;
}

/// Kind of a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalEntryKind {
    /// Insert or replace the record for a task id.
    Upsert,
    /// Tombstone: remove the task id from the folded state.
    Delete,
}

/// One line of the task journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(bound(serialize = "R: Serialize", deserialize = "R: DeserializeOwned"))]
pub struct JournalEntry<R> {
    /// Entry kind.
    #[serde(rename = "type")]
    pub kind: JournalEntryKind,
    /// Task id the entry applies to.
    pub task_id: String,
    /// When the entry was appended, epoch milliseconds.
    pub at: i64,
    /// The record payload, present on upserts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<R>,
}

/// Persistence seam the orchestrator writes through.
#[async_trait]
pub trait TaskStore<R: JournalRecord>: Send + Sync {
    /// Appends an upsert entry for the record.
    async fn save_record(&self, record: &R) -> ApiaryResult<()>;
    /// Appends a tombstone for the task id. Not a physical removal.
    async fn delete_record(&self, task_id: &str) -> ApiaryResult<()>;
    /// Replays the journal and returns the folded live records.
    async fn load_records(&self) -> ApiaryResult<Vec<R>>;
    /// Atomically rewrites the journal to exactly one upsert per record.
    async fn compact(&self, records: &[R]) -> ApiaryResult<()>;
}

/// Append-only JSONL task journal.
///
/// `load_records` folds entries by task id (later entries win, a delete
/// removes the key) and skips malformed lines, so one corrupted line never
/// makes the rest of the history unrecoverable. `compact` is the only way
/// to bound file growth.
pub struct FileTaskStore {
    ledger: JsonlLedger,
    clock: Arc<dyn Clock>,
}

impl FileTaskStore {
    /// Creates a journal at `path` using the system clock.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    /// Creates a journal with an injected clock (tests, simulations).
    pub fn with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger: JsonlLedger::new(path),
            clock,
        }
    }

    /// The underlying ledger.
    pub fn ledger(&self) -> &JsonlLedger {
        &self.ledger
    }
}

#[async_trait]
impl<R: JournalRecord> TaskStore<R> for FileTaskStore {
    async fn save_record(&self, record: &R) -> ApiaryResult<()> {
        let task_id = record.journal_key();
        if task_id.trim().is_empty() {
            return Err(ApiaryError::Store(
                "record task id must be non-empty".to_owned(),
            ));
        }
        self.ledger
            .append(&JournalEntry {
                kind: JournalEntryKind::Upsert,
                task_id: task_id.to_owned(),
                at: self.clock.now_ms(),
                record: Some(record.clone()),
            })
            .await
    }

    async fn delete_record(&self, task_id: &str) -> ApiaryResult<()> {
        if task_id.trim().is_empty() {
            return Err(ApiaryError::Store("task id must be non-empty".to_owned()));
        }
        self.ledger
            .append(&JournalEntry::<R> {
                kind: JournalEntryKind::Delete,
                task_id: task_id.to_owned(),
                at: self.clock.now_ms(),
                record: None,
            })
            .await
    }

    async fn load_records(&self) -> ApiaryResult<Vec<R>> {
        let entries: Vec<JournalEntry<R>> = self.ledger.load().await?;

        // Fold in order: later entries override, deletes drop the key.
        // Insertion order of surviving keys is preserved.
        let mut order: Vec<String> = Vec::new();
        let mut live: HashMap<String, R> = HashMap::new();
        for entry in entries {
            match entry.kind {
                JournalEntryKind::Upsert => {
                    if let Some(record) = entry.record {
                        if !live.contains_key(&entry.task_id) {
                            order.push(entry.task_id.clone());
                        }
                        live.insert(entry.task_id, record);
                    }
                }
                JournalEntryKind::Delete => {
                    if live.remove(&entry.task_id).is_some() {
                        order.retain(|key| key != &entry.task_id);
                    }
                }
            }
        }

        Ok(order.iter().filter_map(|key| live.remove(key)).collect())
    }

    async fn compact(&self, records: &[R]) -> ApiaryResult<()> {
        let at = self.clock.now_ms();
        let entries: Vec<JournalEntry<R>> = records
            .iter()
            .map(|record| JournalEntry {
                kind: JournalEntryKind::Upsert,
                task_id: record.journal_key().to_owned(),
                at,
                record: Some(record.clone()),
            })
            .collect();
        self.ledger.rewrite(&entries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        task_id: String,
        status: String,
    }

    impl JournalRecord for Record {
        fn journal_key(&self) -> &str {
            &self.task_id
        }
    }

    fn record(task_id: &str, status: &str) -> Record {
        Record {
            task_id: task_id.to_owned(),
            status: status.to_owned(),
        }
    }

    fn store(tmp: &TempDir) -> FileTaskStore {
        FileTaskStore::new(tmp.path().join("tasks.jsonl"))
    }

    #[tokio::test]
    async fn test_later_upserts_override_earlier() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        store.save_record(&record("t-1", "dispatched")).await.unwrap();
        store.save_record(&record("t-1", "completed")).await.unwrap();
        store.save_record(&record("t-2", "dispatched")).await.unwrap();

        let records: Vec<Record> = store.load_records().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], record("t-1", "completed"));
        assert_eq!(records[1], record("t-2", "dispatched"));
    }

    #[tokio::test]
    async fn test_delete_is_a_tombstone() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        store.save_record(&record("t-1", "dispatched")).await.unwrap();
        TaskStore::<Record>::delete_record(&store, "t-1").await.unwrap();

        let records: Vec<Record> = store.load_records().await.unwrap();
        assert!(records.is_empty());

        // The tombstone is appended, not a physical removal.
        let lines = tokio::fs::read_to_string(store.ledger().path())
            .await
            .unwrap();
        assert_eq!(lines.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_corrupted_line_does_not_lose_history() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        store.save_record(&record("t-1", "dispatched")).await.unwrap();
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(store.ledger().path())
            .await
            .unwrap()
            .write_all(b"g@rbage\n")
            .await
            .unwrap();
        store.save_record(&record("t-2", "dispatched")).await.unwrap();

        let records: Vec<Record> = store.load_records().await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_compact_round_trip_exact() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        // Build up noisy history.
        store.save_record(&record("t-1", "dispatched")).await.unwrap();
        store.save_record(&record("t-1", "retry_scheduled")).await.unwrap();
        store.save_record(&record("t-2", "dispatched")).await.unwrap();
        TaskStore::<Record>::delete_record(&store, "t-2").await.unwrap();
        store.save_record(&record("t-3", "completed")).await.unwrap();

        let live = vec![record("t-1", "retry_scheduled"), record("t-3", "completed")];
        store.compact(&live).await.unwrap();

        // Exactly one line per live record.
        let lines = tokio::fs::read_to_string(store.ledger().path())
            .await
            .unwrap();
        assert_eq!(lines.lines().count(), 2);

        let reloaded: Vec<Record> = store.load_records().await.unwrap();
        assert_eq!(reloaded, live);
    }

    #[tokio::test]
    async fn test_reopen_preserves_state() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tasks.jsonl");
        {
            let store = FileTaskStore::new(&path);
            store.save_record(&record("t-1", "dispatched")).await.unwrap();
        }
        let store = FileTaskStore::new(&path);
        let records: Vec<Record> = store.load_records().await.unwrap();
        assert_eq!(records, vec![record("t-1", "dispatched")]);
    }

    #[tokio::test]
    async fn test_empty_task_id_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        assert!(store.save_record(&record("  ", "dispatched")).await.is_err());
        assert!(TaskStore::<Record>::delete_record(&store, "").await.is_err());
    }
}
