//! Snapshot storage backends.
//!
//! A store is a last-write-wins blob map keyed by match. It knows nothing
//! about the snapshot format.

use async_trait::async_trait;
use dashmap::DashMap;
use gambit_core::MatchId;
use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot store unavailable: {0}")]
    Unavailable(String),
}

/// Key-value persistence for the latest snapshot of each match.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Overwrite the blob stored for `match_id`.
    async fn put(&self, match_id: MatchId, blob: Vec<u8>) -> Result<(), StoreError>;

    /// The blob stored for `match_id`, if any.
    async fn get(&self, match_id: MatchId) -> Result<Option<Vec<u8>>, StoreError>;
}

/// Process-local store. Snapshots do not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: DashMap<MatchId, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn put(&self, match_id: MatchId, blob: Vec<u8>) -> Result<(), StoreError> {
        self.blobs.insert(match_id, blob);
        Ok(())
    }

    async fn get(&self, match_id: MatchId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.blobs.get(&match_id).map(|blob| blob.clone()))
    }
}

/// One JSON file per match under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, match_id: MatchId) -> PathBuf {
        self.dir.join(format!("{match_id}.json"))
    }
}

#[async_trait]
impl SnapshotStore for FileStore {
    async fn put(&self, match_id: MatchId, blob: Vec<u8>) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        // Readers only ever see a complete file
        let path = self.path_for(match_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &blob).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(%match_id, bytes = blob.len(), path = %path.display(), "snapshot written");
        Ok(())
    }

    async fn get(&self, match_id: MatchId) -> Result<Option<Vec<u8>>, StoreError> {
        match tokio::fs::read(self.path_for(match_id)).await {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

/// Memory store whose writes take `delay` to land.
#[cfg(test)]
pub(crate) struct SlowStore {
    delay: std::time::Duration,
    puts: std::sync::atomic::AtomicUsize,
    inner: MemoryStore,
}

#[cfg(test)]
impl SlowStore {
    pub(crate) fn new(delay: std::time::Duration) -> Self {
        Self {
            delay,
            puts: Default::default(),
            inner: MemoryStore::new(),
        }
    }

    /// Completed writes so far.
    pub(crate) fn puts(&self) -> usize {
        self.puts.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl SnapshotStore for SlowStore {
    async fn put(&self, match_id: MatchId, blob: Vec<u8>) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.put(match_id, blob).await?;
        self.puts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, match_id: MatchId) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(match_id).await
    }
}
