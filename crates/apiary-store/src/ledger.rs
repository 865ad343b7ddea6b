use apiary_core::ApiaryResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// An append-only JSONL file: one serialized entry per line.
///
/// Loading is tolerant — a malformed line is skipped with a warning so a
/// single corrupted entry never makes the rest of the history
/// unrecoverable. Rewrites go through a temp file and an atomic rename.
#[derive(Debug, Clone)]
pub struct JsonlLedger {
    path: PathBuf,
}

impl JsonlLedger {
    /// Creates a ledger over `path`. The file is created on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_parent_dir(&self) -> ApiaryResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Appends one entry as a single line.
    pub async fn append<T: Serialize>(&self, entry: &T) -> ApiaryResult<()> {
        self.ensure_parent_dir().await?;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Loads every parseable entry in file order, skipping malformed lines.
    pub async fn load<T: DeserializeOwned>(&self) -> ApiaryResult<Vec<T>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        let mut entries = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(entry) => entries.push(entry),
                Err(error) => {
                    warn!(
                        path = %self.path.display(),
                        line = index + 1,
                        %error,
                        "skipping malformed ledger line"
                    );
                }
            }
        }
        Ok(entries)
    }

    /// Atomically replaces the file contents with the given entries.
    pub async fn rewrite<T: Serialize>(&self, entries: &[T]) -> ApiaryResult<()> {
        self.ensure_parent_dir().await?;
        let mut payload = String::new();
        for entry in entries {
            payload.push_str(&serde_json::to_string(entry)?);
            payload.push('\n');
        }

        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, payload).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Entry {
        id: u32,
        note: String,
    }

    fn entry(id: u32, note: &str) -> Entry {
        Entry {
            id,
            note: note.to_owned(),
        }
    }

    #[tokio::test]
    async fn test_append_and_load_in_order() {
        let tmp = TempDir::new().unwrap();
        let ledger = JsonlLedger::new(tmp.path().join("events.jsonl"));

        ledger.append(&entry(1, "first")).await.unwrap();
        ledger.append(&entry(2, "second")).await.unwrap();

        let loaded: Vec<Entry> = ledger.load().await.unwrap();
        assert_eq!(loaded, vec![entry(1, "first"), entry(2, "second")]);
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let tmp = TempDir::new().unwrap();
        let ledger = JsonlLedger::new(tmp.path().join("missing.jsonl"));
        let loaded: Vec<Entry> = ledger.load().await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_line_is_skipped_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("events.jsonl");
        let ledger = JsonlLedger::new(&path);

        ledger.append(&entry(1, "ok")).await.unwrap();
        tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap()
            .write_all(b"{not json}\n")
            .await
            .unwrap();
        ledger.append(&entry(2, "also ok")).await.unwrap();

        let loaded: Vec<Entry> = ledger.load().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].id, 2);
    }

    #[tokio::test]
    async fn test_rewrite_replaces_contents() {
        let tmp = TempDir::new().unwrap();
        let ledger = JsonlLedger::new(tmp.path().join("events.jsonl"));

        ledger.append(&entry(1, "old")).await.unwrap();
        ledger.rewrite(&[entry(9, "new")]).await.unwrap();

        let loaded: Vec<Entry> = ledger.load().await.unwrap();
        assert_eq!(loaded, vec![entry(9, "new")]);
    }

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let tmp = TempDir::new().unwrap();
        let ledger = JsonlLedger::new(tmp.path().join("nested/deep/events.jsonl"));
        ledger.append(&entry(1, "first")).await.unwrap();
        assert!(ledger.path().exists());
    }
}
