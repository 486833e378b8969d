//! File-backed snapshot persistence, one JSON document per task.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use ferry_transfer_core::{PersistenceAdapter, TaskSnapshot};
use tracing::warn;
use uuid::Uuid;

/// Snapshot store that keeps `<snapshot_dir>/<task_id>.json` per live task.
///
/// Writes go through a temporary file and rename so a crash mid-write never
/// leaves a truncated snapshot behind.
pub struct JsonSnapshotStore {
    dir: PathBuf,
}

impl JsonSnapshotStore {
    /// Construct a store rooted at `dir`. The directory is created lazily.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn ensure_dir(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create snapshot dir '{}'", self.dir.display()))
    }

    async fn read_snapshot(path: &Path) -> anyhow::Result<TaskSnapshot> {
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read snapshot '{}'", path.display()))?;
        serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse snapshot '{}'", path.display()))
    }
}

#[async_trait]
impl PersistenceAdapter for JsonSnapshotStore {
    async fn save(&self, snapshot: &TaskSnapshot) -> anyhow::Result<()> {
        self.ensure_dir().await?;
        let path = self.path_for(snapshot.id);
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_vec_pretty(snapshot).context("failed to encode snapshot")?;
        tokio::fs::write(&tmp, payload)
            .await
            .with_context(|| format!("failed to write snapshot '{}'", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to publish snapshot '{}'", path.display()))?;
        Ok(())
    }

    async fn delete(&self, task_id: Uuid) -> anyhow::Result<()> {
        let path = self.path_for(task_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to delete snapshot '{}'", path.display()))
            }
        }
    }

    async fn load_incomplete(&self) -> anyhow::Result<Vec<TaskSnapshot>> {
        let mut snapshots = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(snapshots),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to list snapshot dir '{}'", self.dir.display())
                });
            }
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match Self::read_snapshot(&path).await {
                Ok(snapshot) if !snapshot.phase.is_terminal() => snapshots.push(snapshot),
                Ok(_) => {}
                Err(err) => {
                    // A corrupt snapshot must not block the rest of the
                    // restore.
                    warn!(path = %path.display(), error = %err, "skipping unreadable snapshot");
                }
            }
        }
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ferry_events::TaskPhase;
    use ferry_transfer_core::{TaskRecord, TaskSpec};

    fn snapshot(phase: TaskPhase) -> TaskSnapshot {
        let mut record = TaskRecord::from_spec(
            Uuid::new_v4(),
            TaskSpec {
                owner_id: 1,
                chat_ref: "chat-1".to_string(),
                kind: ferry_transfer_core::EngineKind::Torrent,
                source: "magnet:?xt=urn:btih:feed".to_string(),
                display_name: None,
            },
            Utc::now(),
        );
        record.phase = phase;
        TaskSnapshot::from(&record)
    }

    #[tokio::test]
    async fn save_load_delete_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonSnapshotStore::new(dir.path());

        let live = snapshot(TaskPhase::Queued);
        let finished = snapshot(TaskPhase::Completed);
        store.save(&live).await.expect("save live");
        store.save(&finished).await.expect("save finished");

        let loaded = store.load_incomplete().await.expect("load");
        assert_eq!(loaded.len(), 1, "terminal snapshots are filtered");
        assert_eq!(loaded[0].id, live.id);

        store.delete(live.id).await.expect("delete");
        store.delete(live.id).await.expect("repeat delete is a no-op");
        assert!(store.load_incomplete().await.expect("reload").is_empty());
    }

    #[tokio::test]
    async fn corrupt_snapshots_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonSnapshotStore::new(dir.path());

        store.save(&snapshot(TaskPhase::Queued)).await.expect("save");
        tokio::fs::write(dir.path().join("broken.json"), b"not json")
            .await
            .expect("write junk");

        let loaded = store.load_incomplete().await.expect("load");
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn missing_dir_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonSnapshotStore::new(dir.path().join("never-created"));
        assert!(store.load_incomplete().await.expect("load").is_empty());
    }

    #[tokio::test]
    async fn queue_engine_restores_from_json_store() {
        use ferry_queue::{EngineSet, QueueEngine};
        use ferry_telemetry::Metrics;
        use ferry_test_support::{ScriptedEngine, download_spec, fast_config};

        let dir = tempfile::tempdir().expect("tempdir");
        let store = std::sync::Arc::new(JsonSnapshotStore::new(dir.path()));
        let record = TaskRecord::from_spec(Uuid::new_v4(), download_spec(1), Utc::now());
        store.save(&TaskSnapshot::from(&record)).await.expect("seed");

        let torrent = std::sync::Arc::new(ScriptedEngine::new(
            ferry_transfer_core::EngineKind::Torrent,
        ));
        let engines = EngineSet::new().with(torrent);
        let engine = QueueEngine::new(
            &fast_config(),
            engines,
            store,
            Metrics::new().expect("metrics"),
        );

        let restored = engine.restore().await.expect("restore");
        assert_eq!(restored, 1);
        let phase = engine.task(record.id).await.map(|task| task.phase);
        assert_eq!(phase, Some(TaskPhase::Active), "restored task re-admitted");
    }
}
