//! Append-only play history.
//!
//! One JSON object per line: `{"track_id":..,"listener":..,"played_at":..}`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{DaemonError, ErrorCode, Result};

/// A single attributed play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayRecord {
    pub track_id: String,
    pub listener: String,
    /// Unix seconds.
    pub played_at: u64,
}

impl PlayRecord {
    /// Creates a record stamped with the current time.
    pub fn now(track_id: impl Into<String>, listener: impl Into<String>) -> Self {
        let played_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            track_id: track_id.into(),
            listener: listener.into(),
            played_at,
        }
    }
}

/// Handle to the play history log.
#[derive(Clone)]
pub struct PlayHistory {
    path: Option<PathBuf>,
    /// Keeps concurrent appends from interleaving.
    lock: Arc<Mutex<()>>,
}

impl PlayHistory {
    /// Creates a history that appends to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Creates a history that discards records.
    pub fn disabled() -> Self {
        Self {
            path: None,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Appends one record.
    pub async fn append(&self, record: &PlayRecord) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };

        let mut line = serde_json::to_string(record).map_err(|e| {
            DaemonError::with_source(
                ErrorCode::Internal,
                "Failed to serialize play record",
                e,
            )
        })?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DaemonError::io(format!("Failed to create {}", parent.display()), e))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| DaemonError::io(format!("Failed to open {}", path.display()), e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| DaemonError::io(format!("Failed to append to {}", path.display()), e))?;
        Ok(())
    }

    /// Reads every record back. Malformed lines are skipped.
    pub async fn read_all(&self) -> Result<Vec<PlayRecord>> {
        let Some(ref path) = self.path else {
            return Ok(Vec::new());
        };
        read_records(path).await
    }
}

async fn read_records(path: &Path) -> Result<Vec<PlayRecord>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(DaemonError::io(format!("Failed to read {}", path.display()), e)),
    };
    Ok(text
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn append_and_read_back() {
        let dir = tempdir().unwrap();
        let history = PlayHistory::new(dir.path().join("history").join("plays.jsonl"));

        history.append(&PlayRecord::now("t1", "alice")).await.unwrap();
        history.append(&PlayRecord::now("t2", "bob")).await.unwrap();

        let records = history.read_all().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].track_id, "t1");
        assert_eq!(records[1].listener, "bob");
    }

    #[tokio::test]
    async fn concurrent_appends_do_not_interleave() {
        let dir = tempdir().unwrap();
        let history = PlayHistory::new(dir.path().join("plays.jsonl"));

        let mut handles = Vec::new();
        for i in 0..20 {
            let history = history.clone();
            handles.push(tokio::spawn(async move {
                history
                    .append(&PlayRecord::now(format!("t{}", i), "listener"))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(history.read_all().await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn disabled_history_is_a_no_op() {
        let history = PlayHistory::disabled();
        history.append(&PlayRecord::now("t", "l")).await.unwrap();
        assert!(history.read_all().await.unwrap().is_empty());
    }
}
