//! Durable, crash-safe saga snapshots: one file per saga, written on every
//! transition and on a periodic flush, loaded back at startup for
//! recovery.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use marketplace_core::SagaId;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::model::SagaData;

/// Errors reading or writing saga snapshots.
#[derive(Debug, Error)]
pub enum SagaStoreError {
    /// The underlying filesystem operation failed.
    #[error("saga store io error: {0}")]
    Io(String),
    /// The snapshot could not be encoded or decoded.
    #[error("saga store serialization error: {0}")]
    Serialization(String),
    /// No record exists for the requested saga.
    #[error("no saga record for {0}")]
    NotFound(SagaId),
}

/// Durable storage for in-flight saga snapshots.
///
/// Dyn-compatible (`Pin<Box<dyn Future>>` returns) so it can be shared as
/// `Arc<dyn SagaStore>` between the orchestrator and recovery routines.
pub trait SagaStore: Send + Sync {
    /// Persist (create or overwrite) the snapshot for `snapshot.saga_id`.
    fn save(&self, snapshot: SagaData) -> Pin<Box<dyn Future<Output = Result<(), SagaStoreError>> + Send + '_>>;

    /// Remove the on-disk record for `saga_id`. Called once a saga reaches
    /// a terminal state and has finished compensating, if applicable.
    fn delete(&self, saga_id: SagaId) -> Pin<Box<dyn Future<Output = Result<(), SagaStoreError>> + Send + '_>>;

    /// Load every persisted snapshot, for startup recovery.
    fn load_all(&self) -> Pin<Box<dyn Future<Output = Result<Vec<SagaData>, SagaStoreError>> + Send + '_>>;
}

/// A [`SagaStore`] backed by one JSON file per saga in a configured
/// directory, plus an in-memory cache flushed periodically and on
/// shutdown.
pub struct FileSagaStore {
    directory: PathBuf,
    cache: RwLock<HashMap<SagaId, SagaData>>,
}

impl FileSagaStore {
    /// Use (creating if necessary) `directory` for saga snapshot files.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::Io`] if the directory cannot be created.
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self, SagaStoreError> {
        let directory = directory.into();
        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|e| SagaStoreError::Io(e.to_string()))?;
        let store = Self {
            directory,
            cache: RwLock::new(HashMap::new()),
        };
        let existing = store.read_directory().await?;
        {
            let mut guard = store.cache.write().await;
            for snapshot in existing {
                guard.insert(snapshot.saga_id, snapshot);
            }
        }
        Ok(store)
    }

    fn path_for(&self, saga_id: SagaId) -> PathBuf {
        self.directory.join(format!("{saga_id}.json"))
    }

    async fn read_directory(&self) -> Result<Vec<SagaData>, SagaStoreError> {
        let mut entries = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(|e| SagaStoreError::Io(e.to_string()))?;
        let mut snapshots = Vec::new();
        loop {
            let entry = entries
                .next_entry()
                .await
                .map_err(|e| SagaStoreError::Io(e.to_string()))?;
            let Some(entry) = entry else { break };
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_snapshot(&entry.path()).await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(error) => {
                    tracing::warn!(path = %entry.path().display(), %error, "skipping unreadable saga snapshot during recovery");
                }
            }
        }
        Ok(snapshots)
    }

    /// Flush every cached snapshot to disk. Run periodically and once more
    /// on shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::Io`] if any snapshot fails to write; the
    /// remaining snapshots are still attempted.
    pub async fn flush_all(&self) -> Result<(), SagaStoreError> {
        let snapshots: Vec<SagaData> = {
            let guard = self.cache.read().await;
            guard.values().cloned().collect()
        };
        let mut last_error = None;
        for snapshot in snapshots {
            if let Err(error) = write_snapshot(&self.path_for(snapshot.saga_id), &snapshot).await {
                tracing::warn!(saga_id = %snapshot.saga_id, %error, "flush failed for saga snapshot");
                last_error = Some(error);
            }
        }
        last_error.map_or(Ok(()), Err)
    }
}

async fn read_snapshot(path: &Path) -> Result<SagaData, SagaStoreError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| SagaStoreError::Io(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| SagaStoreError::Serialization(e.to_string()))
}

async fn write_snapshot(path: &Path, snapshot: &SagaData) -> Result<(), SagaStoreError> {
    let bytes =
        serde_json::to_vec_pretty(snapshot).map_err(|e| SagaStoreError::Serialization(e.to_string()))?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| SagaStoreError::Io(e.to_string()))
}

impl SagaStore for FileSagaStore {
    fn save(&self, snapshot: SagaData) -> Pin<Box<dyn Future<Output = Result<(), SagaStoreError>> + Send + '_>> {
        Box::pin(async move {
            let path = self.path_for(snapshot.saga_id);
            write_snapshot(&path, &snapshot).await?;
            let mut guard = self.cache.write().await;
            guard.insert(snapshot.saga_id, snapshot);
            Ok(())
        })
    }

    fn delete(&self, saga_id: SagaId) -> Pin<Box<dyn Future<Output = Result<(), SagaStoreError>> + Send + '_>> {
        Box::pin(async move {
            let path = self.path_for(saga_id);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => return Err(SagaStoreError::Io(error.to_string())),
            }
            let mut guard = self.cache.write().await;
            guard.remove(&saga_id);
            Ok(())
        })
    }

    fn load_all(&self) -> Pin<Box<dyn Future<Output = Result<Vec<SagaData>, SagaStoreError>> + Send + '_>> {
        Box::pin(async move {
            let guard = self.cache.read().await;
            Ok(guard.values().cloned().collect())
        })
    }
}

/// Spawn a background task that flushes `store` every `interval` until
/// `shutdown` resolves, then performs one final flush.
pub fn spawn_periodic_flush(
    store: Arc<FileSagaStore>,
    interval: std::time::Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = store.flush_all().await {
                        tracing::warn!(%error, "periodic saga snapshot flush failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        if let Err(error) = store.flush_all().await {
            tracing::warn!(%error, "final saga snapshot flush failed");
        }
    })
}
