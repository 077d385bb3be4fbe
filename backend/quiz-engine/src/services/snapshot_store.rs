use anyhow::Context;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::QuizError;
use crate::metrics::track_cache_operation;
use crate::models::SessionState;

/// The single fixed slot every backend writes to. There is no per-session key:
/// saving always replaces whatever snapshot was there before.
pub const SNAPSHOT_KEY: &str = "quiz:current-session";

/// Durable single-slot storage for the in-progress session.
#[async_trait]
pub trait SessionSnapshotStore: Send + Sync {
    async fn save(&self, state: &SessionState) -> Result<(), QuizError>;

    /// Unreadable snapshots are reported as absent.
    async fn load(&self) -> Result<Option<SessionState>, QuizError>;

    async fn clear(&self) -> Result<(), QuizError>;
}

fn decode_snapshot(raw: &str, source: &str) -> Option<SessionState> {
    match serde_json::from_str::<SessionState>(raw) {
        Ok(state) => Some(state),
        Err(e) => {
            tracing::warn!("Ignoring unreadable session snapshot in {}: {}", source, e);
            None
        }
    }
}

fn storage_error(e: anyhow::Error) -> QuizError {
    QuizError::Storage(format!("{:#}", e))
}

/// Snapshot kept in a JSON file on the local device.
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SessionSnapshotStore for FileSnapshotStore {
    async fn save(&self, state: &SessionState) -> Result<(), QuizError> {
        let json = serde_json::to_vec(state).map_err(|e| QuizError::Storage(e.to_string()))?;
        let tmp_path = self.path.with_extension("json.tmp");

        track_cache_operation("file_save", async {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create snapshot directory")?;
            }
            // write-then-rename so a crash mid-write keeps the previous snapshot
            tokio::fs::write(&tmp_path, &json)
                .await
                .context("Failed to write session snapshot")?;
            tokio::fs::rename(&tmp_path, &self.path)
                .await
                .context("Failed to replace session snapshot")
        })
        .await
        .map_err(storage_error)
    }

    async fn load(&self) -> Result<Option<SessionState>, QuizError> {
        let raw = track_cache_operation("file_load", async {
            match tokio::fs::read_to_string(&self.path).await {
                Ok(raw) => Ok(Some(raw)),
                Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
                Err(e) => Err(anyhow::Error::new(e).context("Failed to read session snapshot")),
            }
        })
        .await
        .map_err(storage_error)?;

        Ok(raw.and_then(|raw| decode_snapshot(&raw, &self.path.display().to_string())))
    }

    async fn clear(&self) -> Result<(), QuizError> {
        track_cache_operation("file_clear", async {
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
                Err(e) => Err(anyhow::Error::new(e).context("Failed to delete session snapshot")),
            }
        })
        .await
        .map_err(storage_error)
    }
}

/// Snapshot kept under a fixed Redis key (no TTL).
pub struct RedisSnapshotStore {
    redis: ConnectionManager,
    key: String,
}

impl RedisSnapshotStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            key: SNAPSHOT_KEY.to_string(),
        }
    }
}

#[async_trait]
impl SessionSnapshotStore for RedisSnapshotStore {
    async fn save(&self, state: &SessionState) -> Result<(), QuizError> {
        let json = serde_json::to_string(state).map_err(|e| QuizError::Storage(e.to_string()))?;
        let mut conn = self.redis.clone();

        track_cache_operation("set", async {
            redis::cmd("SET")
                .arg(&self.key)
                .arg(json)
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to save session snapshot to Redis")
        })
        .await
        .map_err(storage_error)
    }

    async fn load(&self) -> Result<Option<SessionState>, QuizError> {
        let mut conn = self.redis.clone();

        let raw: Option<String> = track_cache_operation("get", async {
            redis::cmd("GET")
                .arg(&self.key)
                .query_async(&mut conn)
                .await
                .context("Failed to read session snapshot from Redis")
        })
        .await
        .map_err(storage_error)?;

        Ok(raw.and_then(|raw| decode_snapshot(&raw, "redis")))
    }

    async fn clear(&self) -> Result<(), QuizError> {
        let mut conn = self.redis.clone();

        track_cache_operation("del", async {
            redis::cmd("DEL")
                .arg(&self.key)
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to delete session snapshot from Redis")
        })
        .await
        .map_err(storage_error)
    }
}

/// Process-local slot. Stores the serialized form so round-trips behave like
/// the durable backends.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    slot: Mutex<Option<String>>,
    saves: AtomicUsize,
    clears: AtomicUsize,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_none()
    }
}

#[async_trait]
impl SessionSnapshotStore for InMemorySnapshotStore {
    async fn save(&self, state: &SessionState) -> Result<(), QuizError> {
        let json = serde_json::to_string(state).map_err(|e| QuizError::Storage(e.to_string()))?;
        *self.slot.lock().unwrap_or_else(|p| p.into_inner()) = Some(json);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self) -> Result<Option<SessionState>, QuizError> {
        let raw = self.slot.lock().unwrap_or_else(|p| p.into_inner()).clone();
        Ok(raw.and_then(|raw| decode_snapshot(&raw, "memory")))
    }

    async fn clear(&self) -> Result<(), QuizError> {
        *self.slot.lock().unwrap_or_else(|p| p.into_inner()) = None;
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
