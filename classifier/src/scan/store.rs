//! Checkpoint persistence. Crash-resumability is a hard requirement, so the
//! scan driver talks to an explicit store abstraction instead of an in-memory
//! map: the in-memory backend serves tests and embedded use, the JSON-file
//! backend gives single-node durability.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::ScanError;
use crate::scan::progress::{ScanCheckpoint, ScanProgress};

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save_checkpoint(&self, checkpoint: &ScanCheckpoint) -> Result<(), ScanError>;

    async fn load_checkpoint(&self, scan_id: Uuid) -> Result<Option<ScanCheckpoint>, ScanError>;

    async fn save_progress(&self, progress: &ScanProgress) -> Result<(), ScanError>;

    async fn load_progress(&self, scan_id: Uuid) -> Result<Option<ScanProgress>, ScanError>;
}

#[derive(Default)]
struct MemoryState {
    checkpoints: HashMap<Uuid, ScanCheckpoint>,
    progress: HashMap<Uuid, ScanProgress>,
}

/// Volatile store. Survives driver restarts within a process, not crashes.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    state: RwLock<MemoryState>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save_checkpoint(&self, checkpoint: &ScanCheckpoint) -> Result<(), ScanError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state
            .checkpoints
            .insert(checkpoint.scan_id, checkpoint.clone());
        Ok(())
    }

    async fn load_checkpoint(&self, scan_id: Uuid) -> Result<Option<ScanCheckpoint>, ScanError> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(state.checkpoints.get(&scan_id).cloned())
    }

    async fn save_progress(&self, progress: &ScanProgress) -> Result<(), ScanError> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.progress.insert(progress.scan_id, progress.clone());
        Ok(())
    }

    async fn load_progress(&self, scan_id: Uuid) -> Result<Option<ScanProgress>, ScanError> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(state.progress.get(&scan_id).cloned())
    }
}

/// One JSON document per scan id and kind, written via a temp file + rename
/// so a torn write never leaves a half-checkpoint behind.
pub struct JsonFileCheckpointStore {
    dir: PathBuf,
}

impl JsonFileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, scan_id: Uuid, kind: &str) -> PathBuf {
        self.dir.join(format!("{scan_id}.{kind}.json"))
    }

    async fn write_json<T: serde::Serialize>(
        &self,
        path: PathBuf,
        value: &T,
    ) -> Result<(), ScanError> {
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| ScanError::CheckpointWrite(e.to_string()))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ScanError::CheckpointWrite(e.to_string()))?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| ScanError::CheckpointWrite(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| ScanError::CheckpointWrite(e.to_string()))?;
        Ok(())
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        path: PathBuf,
    ) -> Result<Option<T>, ScanError> {
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| ScanError::CheckpointWrite(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ScanError::CheckpointWrite(e.to_string())),
        }
    }
}

#[async_trait]
impl CheckpointStore for JsonFileCheckpointStore {
    async fn save_checkpoint(&self, checkpoint: &ScanCheckpoint) -> Result<(), ScanError> {
        self.write_json(self.path(checkpoint.scan_id, "checkpoint"), checkpoint)
            .await
    }

    async fn load_checkpoint(&self, scan_id: Uuid) -> Result<Option<ScanCheckpoint>, ScanError> {
        self.read_json(self.path(scan_id, "checkpoint")).await
    }

    async fn save_progress(&self, progress: &ScanProgress) -> Result<(), ScanError> {
        self.write_json(self.path(progress.scan_id, "progress"), progress)
            .await
    }

    async fn load_progress(&self, scan_id: Uuid) -> Result<Option<ScanProgress>, ScanError> {
        self.read_json(self.path(scan_id, "progress")).await
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::scan::progress::{ScanConfig, ScanStatus};

    use super::*;

    fn checkpoint(scan_id: Uuid) -> ScanCheckpoint {
        ScanCheckpoint {
            scan_id,
            batch_number: 2,
            last_email_id: Some("msg-7".into()),
            next_page_token: Some("page-3".into()),
            processed_count: 200,
        }
    }

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemoryCheckpointStore::new();
        let scan_id = Uuid::new_v4();

        assert!(store.load_checkpoint(scan_id).await.unwrap().is_none());
        store.save_checkpoint(&checkpoint(scan_id)).await.unwrap();
        assert_eq!(
            store.load_checkpoint(scan_id).await.unwrap().unwrap(),
            checkpoint(scan_id)
        );
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let scan_id = Uuid::new_v4();

        {
            let store = JsonFileCheckpointStore::new(dir.path());
            store.save_checkpoint(&checkpoint(scan_id)).await.unwrap();

            let mut progress = ScanProgress::new(scan_id, ScanConfig::new("acct"));
            progress.status = ScanStatus::InProgress;
            store.save_progress(&progress).await.unwrap();
        }

        // A brand new store over the same directory sees the data: this is
        // the crash-recovery path.
        let store = JsonFileCheckpointStore::new(dir.path());
        assert_eq!(
            store.load_checkpoint(scan_id).await.unwrap().unwrap(),
            checkpoint(scan_id)
        );
        let progress = store.load_progress(scan_id).await.unwrap().unwrap();
        assert_eq!(progress.status, ScanStatus::InProgress);
    }

    #[tokio::test]
    async fn missing_scan_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileCheckpointStore::new(dir.path());
        assert!(store.load_checkpoint(Uuid::new_v4()).await.unwrap().is_none());
        assert!(store.load_progress(Uuid::new_v4()).await.unwrap().is_none());
    }
}
