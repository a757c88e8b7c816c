//! Chunk persistence seam.
//!
//! DESIGN
//! ======
//! Durable storage is an injected collaborator behind an object-safe
//! trait: the server loads chunks lazily on first request and flushes
//! dirty rasters on a background cadence, but never depends on a concrete
//! backend. The in-memory implementation backs tests and standalone runs.
//!
//! ERROR HANDLING
//! ==============
//! Storage failures are logged and absorbed; in-memory chunk state stays
//! authoritative and dirty flags are retained so the next flush retries.
//! Operations not flushed before shutdown are lost, by design.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::coords::ChunkCoord;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Encoded chunk raster as it crosses the persistence boundary.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub encoded: String,
    pub last_modified: i64,
}

/// Injected persistence collaborator.
#[async_trait]
pub trait ChunkStorage: Send + Sync {
    /// Fetch a previously saved chunk, if any.
    async fn load(&self, room: &str, coord: ChunkCoord) -> Result<Option<StoredChunk>, StorageError>;

    /// Persist an encoded chunk raster.
    async fn save(&self, room: &str, coord: ChunkCoord, chunk: StoredChunk) -> Result<(), StorageError>;
}

/// Process-local storage. Chunks survive room eviction but not restarts.
#[derive(Default)]
pub struct MemoryStorage {
    chunks: Mutex<HashMap<(String, ChunkCoord), StoredChunk>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, ChunkCoord), StoredChunk>> {
        self.chunks.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl ChunkStorage for MemoryStorage {
    async fn load(&self, room: &str, coord: ChunkCoord) -> Result<Option<StoredChunk>, StorageError> {
        Ok(self.lock().get(&(room.to_owned(), coord)).cloned())
    }

    async fn save(&self, room: &str, coord: ChunkCoord, chunk: StoredChunk) -> Result<(), StorageError> {
        self.lock().insert((room.to_owned(), coord), chunk);
        Ok(())
    }
}
