//! Durable batch progress snapshots
//!
//! One JSON file per checkpoint, named `batch_{id}_{micros}.json` inside the checkpoint
//! directory. Files are written to a temp name, synced, then renamed into place, so a
//! reader either sees a complete checkpoint or none at all.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{CheckpointError, Result};
use crate::types::BatchId;

/// Format version written into every checkpoint
pub const CHECKPOINT_VERSION: &str = "1.0";

/// A persisted snapshot of batch progress
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Batch the snapshot belongs to
    pub batch_id: BatchId,
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
    /// Checkpoint format version
    pub version: String,
    /// Opaque progress state
    pub state: serde_json::Value,
}

/// Directory listing entry for a checkpoint file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckpointInfo {
    /// Batch the checkpoint belongs to
    pub batch_id: BatchId,
    /// When the checkpoint was taken
    pub timestamp: DateTime<Utc>,
    /// Location of the checkpoint file
    pub path: PathBuf,
}

/// Writes, reads, and prunes checkpoint files in one directory
#[derive(Clone, Debug)]
pub struct CheckpointManager {
    directory: PathBuf,
}

impl CheckpointManager {
    /// Manage checkpoints under `directory`, created on first write
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Directory holding the checkpoint files
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Write a checkpoint for `batch_id` and return its path
    ///
    /// On failure the temp file is removed and a [`CheckpointError`] is returned.
    pub async fn create_checkpoint(
        &self,
        batch_id: BatchId,
        state: &serde_json::Value,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| CheckpointError::Directory {
                path: self.directory.clone(),
                reason: e.to_string(),
            })?;

        let timestamp = Utc::now();
        let checkpoint = Checkpoint {
            batch_id,
            timestamp,
            version: CHECKPOINT_VERSION.to_string(),
            state: state.clone(),
        };
        let json =
            serde_json::to_vec_pretty(&checkpoint).map_err(|e| CheckpointError::Serialize {
                batch_id,
                reason: e.to_string(),
            })?;

        let path = self.directory.join(file_name(batch_id, timestamp));
        let suffix: u32 = rand::thread_rng().r#gen();
        let temp_path = path.with_extension(format!("json.{suffix:08x}.tmp"));

        if let Err(e) = write_synced(&temp_path, &json).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(CheckpointError::Write {
                batch_id,
                path,
                reason: e.to_string(),
            }
            .into());
        }

        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(CheckpointError::Write {
                batch_id,
                path,
                reason: e.to_string(),
            }
            .into());
        }

        tracing::debug!(batch_id = %batch_id, path = %path.display(), "Checkpoint written");
        Ok(path)
    }

    /// Newest checkpoint for `batch_id`
    ///
    /// Returns `None` when no checkpoint exists or the newest one cannot be read or parsed.
    pub async fn load_checkpoint(&self, batch_id: BatchId) -> Option<Checkpoint> {
        let newest = self
            .list_checkpoints()
            .await
            .into_iter()
            .find(|info| info.batch_id == batch_id)?;

        let bytes = match fs::read(&newest.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %newest.path.display(), error = %e, "Failed to read checkpoint");
                return None;
            }
        };

        match serde_json::from_slice::<Checkpoint>(&bytes) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                tracing::warn!(path = %newest.path.display(), error = %e, "Ignoring corrupt checkpoint");
                None
            }
        }
    }

    /// Whether any checkpoint file exists for `batch_id`
    pub async fn has_checkpoint(&self, batch_id: BatchId) -> bool {
        self.list_checkpoints()
            .await
            .iter()
            .any(|info| info.batch_id == batch_id)
    }

    /// All checkpoints, newest first
    ///
    /// A missing or unreadable directory yields an empty list. Files not following the
    /// checkpoint naming scheme are skipped.
    pub async fn list_checkpoints(&self) -> Vec<CheckpointInfo> {
        let mut entries = match fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        directory = %self.directory.display(),
                        error = %e,
                        "Failed to list checkpoints"
                    );
                }
                return Vec::new();
            }
        };

        let mut checkpoints = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    if let Some((batch_id, timestamp)) = parse_file_name(&path) {
                        checkpoints.push(CheckpointInfo {
                            batch_id,
                            timestamp,
                            path,
                        });
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read checkpoint directory entry");
                    break;
                }
            }
        }

        checkpoints.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.path.cmp(&a.path))
        });
        checkpoints
    }

    /// Delete every checkpoint of `batch_id`, returning how many were removed
    pub async fn delete_checkpoints(&self, batch_id: BatchId) -> usize {
        let mut removed = 0;
        for info in self.list_checkpoints().await {
            if info.batch_id != batch_id {
                continue;
            }
            match fs::remove_file(&info.path).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(path = %info.path.display(), error = %e, "Failed to delete checkpoint");
                }
            }
        }
        removed
    }

    /// Delete checkpoint files last modified more than `max_age_days` ago
    ///
    /// Individual failures are logged and skipped. Returns the number of files removed.
    pub async fn cleanup_old(&self, max_age_days: u32) -> usize {
        let max_age = Duration::from_secs(u64::from(max_age_days) * 24 * 60 * 60);
        let Some(cutoff) = SystemTime::now().checked_sub(max_age) else {
            return 0;
        };

        let mut removed = 0;
        for info in self.list_checkpoints().await {
            let modified = match fs::metadata(&info.path).await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::warn!(path = %info.path.display(), error = %e, "Failed to stat checkpoint");
                    continue;
                }
            };

            if modified >= cutoff {
                continue;
            }

            match fs::remove_file(&info.path).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(path = %info.path.display(), error = %e, "Failed to delete old checkpoint");
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed, max_age_days, "Cleaned up old checkpoints");
        }
        removed
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

fn file_name(batch_id: BatchId, timestamp: DateTime<Utc>) -> String {
    format!("batch_{}_{}.json", batch_id, timestamp.timestamp_micros())
}

fn parse_file_name(path: &Path) -> Option<(BatchId, DateTime<Utc>)> {
    let stem = path
        .file_name()?
        .to_str()?
        .strip_prefix("batch_")?
        .strip_suffix(".json")?;
    let (id, micros) = stem.split_once('_')?;
    let batch_id = BatchId(id.parse().ok()?);
    let timestamp = DateTime::from_timestamp_micros(micros.parse().ok()?)?;
    Some((batch_id, timestamp))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("checkpoints"));
        let state = json!({ "completed": 10, "failed": 2, "extra": ["a", "b"] });

        let path = manager.create_checkpoint(BatchId(7), &state).await.unwrap();
        assert!(path.exists());

        let checkpoint = manager.load_checkpoint(BatchId(7)).await.unwrap();
        assert_eq!(checkpoint.batch_id, BatchId(7));
        assert_eq!(checkpoint.version, "1.0");
        assert_eq!(checkpoint.state, state);
    }

    #[tokio::test]
    async fn test_file_shape_has_iso_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());

        let path = manager
            .create_checkpoint(BatchId(1), &json!({ "completed": 1 }))
            .await
            .unwrap();
        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();

        assert_eq!(raw["batch_id"], json!(1));
        assert_eq!(raw["version"], json!("1.0"));
        let timestamp = raw["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(timestamp).is_ok(), "got {timestamp}");
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        manager
            .create_checkpoint(BatchId(3), &json!({}))
            .await
            .unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(!names[0].ends_with(".tmp"));
    }

    #[tokio::test]
    async fn test_missing_checkpoint_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path().join("never-created"));
        assert!(manager.load_checkpoint(BatchId(1)).await.is_none());
        assert!(manager.list_checkpoints().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_is_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("batch_4_1700000000000000.json"), b"{ truncated").unwrap();

        let manager = CheckpointManager::new(dir.path());
        assert!(manager.has_checkpoint(BatchId(4)).await);
        assert!(manager.load_checkpoint(BatchId(4)).await.is_none());
    }

    #[tokio::test]
    async fn test_load_returns_newest() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());

        manager
            .create_checkpoint(BatchId(2), &json!({ "completed": 1 }))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        manager
            .create_checkpoint(BatchId(2), &json!({ "completed": 2 }))
            .await
            .unwrap();

        let checkpoint = manager.load_checkpoint(BatchId(2)).await.unwrap();
        assert_eq!(checkpoint.state["completed"], json!(2));
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();

        manager.create_checkpoint(BatchId(1), &json!({})).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        manager.create_checkpoint(BatchId(2), &json!({})).await.unwrap();

        let listed = manager.list_checkpoints().await;
        let ids: Vec<BatchId> = listed.iter().map(|c| c.batch_id).collect();
        assert_eq!(ids, vec![BatchId(2), BatchId(1)]);
        assert!(listed[0].timestamp >= listed[1].timestamp);
    }

    #[tokio::test]
    async fn test_delete_checkpoints_only_touches_one_batch() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        manager.create_checkpoint(BatchId(1), &json!({})).await.unwrap();
        manager.create_checkpoint(BatchId(2), &json!({})).await.unwrap();

        assert_eq!(manager.delete_checkpoints(BatchId(1)).await, 1);
        assert!(!manager.has_checkpoint(BatchId(1)).await);
        assert!(manager.has_checkpoint(BatchId(2)).await);
    }

    #[tokio::test]
    async fn test_cleanup_old_keeps_recent_files() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        manager.create_checkpoint(BatchId(1), &json!({})).await.unwrap();

        assert_eq!(manager.cleanup_old(7).await, 0);
        assert!(manager.has_checkpoint(BatchId(1)).await);

        // A zero-day threshold removes everything written before now
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.cleanup_old(0).await, 1);
        assert!(manager.list_checkpoints().await.is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_reports_checkpoint_error() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the directory should be
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"").unwrap();

        let manager = CheckpointManager::new(&blocker);
        let err = manager
            .create_checkpoint(BatchId(1), &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Checkpoint(_)), "got {err:?}");
    }

    #[test]
    fn test_file_name_round_trip() {
        let ts = DateTime::from_timestamp_micros(1_700_000_000_123_456).unwrap();
        let name = file_name(BatchId(42), ts);
        assert_eq!(name, "batch_42_1700000000123456.json");
        assert_eq!(
            parse_file_name(Path::new(&name)),
            Some((BatchId(42), ts))
        );
        assert_eq!(parse_file_name(Path::new("batch_42.json")), None);
        assert_eq!(parse_file_name(Path::new("batch_x_1.json.tmp")), None);
    }
}
