use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

pub const JOURNAL_FILE_NAME: &str = ".romfetch-journal.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalStatus {
    Started,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub item_id: String,
    pub status: JournalStatus,
    pub byte_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub run_id: String,
}

struct JournalState {
    file: File,
    latest: HashMap<String, JournalRecord>,
}

/// Append-only JSON-lines log of per-item outcomes, one record per line.
///
/// Only the last record for an item counts. Lines that fail to parse (for
/// example a write torn by a crash) are skipped on load.
pub struct Journal {
    path: PathBuf,
    run_id: String,
    state: Mutex<JournalState>,
}

impl Journal {
    /// Journal kept alongside the downloads in `output_dir`.
    pub async fn open_in(output_dir: &Path) -> Result<Self> {
        Self::open(&output_dir.join(JOURNAL_FILE_NAME)).await
    }

    pub async fn open(path: &Path) -> Result<Self> {
        let mut latest = HashMap::new();

        if fs::try_exists(path).await.unwrap_or(false) {
            let content = fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read journal: {:?}", path))?;

            for (index, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JournalRecord>(line) {
                    Ok(record) => {
                        latest.insert(record.item_id.clone(), record);
                    }
                    Err(e) => warn!("Skipping journal line {}: {}", index + 1, e),
                }
            }
            debug!("Loaded {} journal entries from {:?}", latest.len(), path);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create journal directory: {:?}", parent))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open journal: {:?}", path))?;

        Ok(Self {
            path: path.to_path_buf(),
            run_id: Uuid::new_v4().to_string(),
            state: Mutex::new(JournalState { file, latest }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub async fn record(
        &self,
        item_id: &str,
        status: JournalStatus,
        byte_count: u64,
        sha256: Option<String>,
    ) -> Result<()> {
        self.append(JournalRecord {
            item_id: item_id.to_string(),
            status,
            byte_count,
            sha256,
            recorded_at: Utc::now(),
            run_id: self.run_id.clone(),
        })
        .await
    }

    pub async fn append(&self, record: JournalRecord) -> Result<()> {
        let mut line = serde_json::to_string(&record).context("Failed to encode journal record")?;
        line.push('\n');

        let mut state = self.state.lock().await;
        state
            .file
            .write_all(line.as_bytes())
            .await
            .context("Failed to write journal record")?;
        state.file.flush().await?;
        state.latest.insert(record.item_id.clone(), record);
        Ok(())
    }

    pub async fn latest(&self, item_id: &str) -> Option<JournalRecord> {
        self.state.lock().await.latest.get(item_id).cloned()
    }

    /// True when the item last finished as completed and the file on disk
    /// still has the recorded size.
    pub async fn is_complete(&self, item_id: &str, bytes_on_disk: u64) -> bool {
        matches!(
            self.latest(item_id).await,
            Some(JournalRecord {
                status: JournalStatus::Completed,
                byte_count,
                ..
            }) if byte_count == bytes_on_disk
        )
    }
}

/// Hex SHA-256 of a file's contents.
pub async fn sha256_file(path: &Path) -> Result<String> {
    use sha2::{Digest, Sha256};

    let file = File::open(path)
        .await
        .with_context(|| format!("Failed to open file: {:?}", path))?;
    let mut reader = BufReader::new(file);
    let mut buffer = vec![0u8; 64 * 1024];
    let mut hasher = Sha256::new();

    loop {
        let bytes_read = reader.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_last_record_wins_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.jsonl");

        {
            let journal = Journal::open(&path).await.unwrap();
            journal
                .record("http://roms.test/a.zip", JournalStatus::Failed, 10, None)
                .await
                .unwrap();
            journal
                .record("http://roms.test/a.zip", JournalStatus::Completed, 2048, None)
                .await
                .unwrap();
            journal
                .record("http://roms.test/b.zip", JournalStatus::Cancelled, 99, None)
                .await
                .unwrap();
        }

        let journal = Journal::open(&path).await.unwrap();
        assert!(journal.is_complete("http://roms.test/a.zip", 2048).await);
        assert!(!journal.is_complete("http://roms.test/a.zip", 2047).await);
        assert!(!journal.is_complete("http://roms.test/b.zip", 99).await);
        assert!(!journal.is_complete("http://roms.test/missing.zip", 0).await);
    }

    #[tokio::test]
    async fn test_torn_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.jsonl");

        let good = JournalRecord {
            item_id: "http://roms.test/a.zip".to_string(),
            status: JournalStatus::Completed,
            byte_count: 4096,
            sha256: None,
            recorded_at: Utc::now(),
            run_id: "earlier".to_string(),
        };
        let content = format!(
            "{}\n{{\"item_id\":\"http://roms.test/b.zip\",\"sta",
            serde_json::to_string(&good).unwrap()
        );
        std::fs::write(&path, content).unwrap();

        let journal = Journal::open(&path).await.unwrap();
        assert!(journal.is_complete("http://roms.test/a.zip", 4096).await);
        assert_eq!(journal.latest("http://roms.test/b.zip").await, None);
    }

    #[tokio::test]
    async fn test_records_are_json_lines() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open_in(dir.path()).await.unwrap();
        journal
            .record(
                "http://roms.test/a.zip",
                JournalStatus::Completed,
                5,
                Some("abc".to_string()),
            )
            .await
            .unwrap();

        let content = std::fs::read_to_string(dir.path().join(JOURNAL_FILE_NAME)).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\"status\":\"completed\""));
        assert!(lines[0].contains(journal.run_id()));
    }

    #[tokio::test]
    async fn test_sha256_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"abc").unwrap();

        assert_eq!(
            sha256_file(&path).await.unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
