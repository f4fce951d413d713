//! JSON checkpoint files
//!
//! One file per scope. Saves go to a temporary sibling, are fsynced, then
//! renamed over the previous file so a crash leaves either the old or the
//! new checkpoint, never a torn one.

use async_trait::async_trait;
use statline_common::types::Checkpoint;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::CheckpointStore;
use crate::error::{IngestError, Result};

pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, scope: &str) -> Result<PathBuf> {
        let valid = !scope.is_empty()
            && scope
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(IngestError::config(format!("invalid checkpoint scope '{}'", scope)));
        }
        Ok(self.dir.join(format!("{}.checkpoint.json", scope)))
    }

    async fn read(&self, path: &Path) -> std::io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let tmp = path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, path).await?;

        // Persist the rename itself; not every platform allows opening a directory.
        match tokio::fs::File::open(&self.dir).await {
            Ok(dir) => {
                if let Err(e) = dir.sync_all().await {
                    debug!(dir = %self.dir.display(), error = %e, "Directory fsync failed");
                }
            },
            Err(e) => debug!(dir = %self.dir.display(), error = %e, "Directory not opened for fsync"),
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, scope: &str) -> Result<Checkpoint> {
        let path = self.path_for(scope)?;
        let load_err = |reason: String| IngestError::CheckpointLoad {
            scope: scope.to_string(),
            reason,
        };

        match self.read(&path).await.map_err(|e| load_err(e.to_string()))? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| load_err(format!("{}: {}", path.display(), e))),
            None => Ok(Checkpoint::default()),
        }
    }

    async fn save(&self, scope: &str, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.path_for(scope)?;

        let mut merged = checkpoint.clone();
        match self.read(&path).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Checkpoint>(&bytes) {
                Ok(existing) => merged.advance_to(existing.last_completed_work_id),
                Err(e) => warn!(
                    scope,
                    path = %path.display(),
                    error = %e,
                    "Existing checkpoint unreadable, overwriting without merge"
                ),
            },
            Ok(None) => {},
            Err(e) => warn!(
                scope,
                path = %path.display(),
                error = %e,
                "Existing checkpoint could not be read, overwriting without merge"
            ),
        }

        let bytes = serde_json::to_vec_pretty(&merged)?;
        self.write_atomic(&path, &bytes).await?;

        debug!(scope, path = %path.display(), cursor = ?merged.last_completed_work_id, "Checkpoint written");
        Ok(())
    }

    async fn reset(&self, scope: &str) -> Result<()> {
        let path = self.path_for(scope)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn checkpoint(cursor: i64, processed: u64) -> Checkpoint {
        Checkpoint {
            last_completed_work_id: Some(cursor),
            processed_count: processed,
            success_count: processed,
            saved_at: Some(Utc::now()),
            ..Checkpoint::default()
        }
    }

    #[tokio::test]
    async fn test_load_missing_returns_zero_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        let loaded = store.load("nba").await.unwrap();
        assert!(loaded.is_zero());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoints"));

        store.save("nfl", &checkpoint(40, 40)).await.unwrap();
        let loaded = store.load("nfl").await.unwrap();

        assert_eq!(loaded.last_completed_work_id, Some(40));
        assert_eq!(loaded.processed_count, 40);
        assert!(!dir.path().join("checkpoints/nfl.checkpoint.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_save_never_moves_cursor_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        store.save("all", &checkpoint(100, 100)).await.unwrap();
        store.save("all", &checkpoint(60, 130)).await.unwrap();

        let loaded = store.load("all").await.unwrap();
        assert_eq!(loaded.last_completed_work_id, Some(100));
        assert_eq!(loaded.processed_count, 130);
    }

    #[tokio::test]
    async fn test_reset_removes_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        store.save("mlb", &checkpoint(5, 5)).await.unwrap();
        store.reset("mlb").await.unwrap();
        store.reset("mlb").await.unwrap();

        assert!(store.load("mlb").await.unwrap().is_zero());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nhl.checkpoint.json"), b"{not json").unwrap();
        let store = FileCheckpointStore::new(dir.path());

        let err = store.load("nhl").await.unwrap_err();
        assert!(matches!(err, IngestError::CheckpointLoad { .. }));
    }

    #[tokio::test]
    async fn test_save_over_corrupt_file_replaces_it() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nhl.checkpoint.json"), b"{not json").unwrap();
        let store = FileCheckpointStore::new(dir.path());

        store.save("nhl", &checkpoint(12, 12)).await.unwrap();

        let loaded = store.load("nhl").await.unwrap();
        assert_eq!(loaded.last_completed_work_id, Some(12));
        assert_eq!(loaded.processed_count, 12);
    }

    #[tokio::test]
    async fn test_scope_with_path_separator_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(store.load("../escape").await.is_err());
    }
}
