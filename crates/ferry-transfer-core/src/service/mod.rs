//! Adapter traits implemented by backend engines and snapshot stores.

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{EngineHandle, EngineKind, ProgressReport, TaskSnapshot, TaskSpec};

/// Backend engine contract implemented by each transfer adapter.
///
/// Implementations wrap a concrete client (bittorrent session, usenet
/// daemon, HTTP fetcher, cloud SDK) behind a uniform start/poll/cancel
/// surface. All methods must be safe to call concurrently.
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    /// The backend family this adapter serves.
    fn kind(&self) -> EngineKind;

    /// Begin executing a task, returning the engine's opaque handle.
    async fn start(&self, task_id: Uuid, spec: &TaskSpec) -> anyhow::Result<EngineHandle>;

    /// Fetch a point-in-time progress report for a running task.
    async fn progress(&self, handle: &EngineHandle) -> anyhow::Result<ProgressReport>;

    /// Stop a running task and release its engine-side resources.
    ///
    /// Must be idempotent: cancelling an already-stopped or unknown handle
    /// succeeds without effect.
    async fn cancel(&self, handle: &EngineHandle) -> anyhow::Result<()>;
}

/// Durable store for task snapshots, consulted on restart.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Upsert the snapshot for a task.
    async fn save(&self, snapshot: &TaskSnapshot) -> anyhow::Result<()>;

    /// Remove the snapshot for a retired task. Unknown ids are a no-op.
    async fn delete(&self, task_id: Uuid) -> anyhow::Result<()>;

    /// Load every snapshot whose phase is not terminal.
    async fn load_incomplete(&self) -> anyhow::Result<Vec<TaskSnapshot>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskCategory;

    struct NullEngine;

    #[async_trait]
    impl EngineAdapter for NullEngine {
        fn kind(&self) -> EngineKind {
            EngineKind::DirectHttp
        }

        async fn start(&self, task_id: Uuid, _spec: &TaskSpec) -> anyhow::Result<EngineHandle> {
            Ok(EngineHandle::new(task_id.to_string()))
        }

        async fn progress(&self, _handle: &EngineHandle) -> anyhow::Result<ProgressReport> {
            Ok(ProgressReport::default())
        }

        async fn cancel(&self, _handle: &EngineHandle) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn adapters_are_object_safe() {
        let engine: Box<dyn EngineAdapter> = Box::new(NullEngine);
        assert_eq!(engine.kind().category(), TaskCategory::Download);

        let id = Uuid::new_v4();
        let handle = engine
            .start(
                id,
                &TaskSpec {
                    owner_id: 1,
                    chat_ref: "chat-1".to_string(),
                    kind: EngineKind::DirectHttp,
                    source: "https://example.com/file.bin".to_string(),
                    display_name: None,
                },
            )
            .await
            .expect("start");
        assert_eq!(handle.as_str(), id.to_string());
        assert!(engine.cancel(&handle).await.is_ok());
    }
}
