//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! Each live room owns its own chunk store, region index, and space
//! allocator; the session registry maps connections to rooms. Every
//! collection is mutated only through its owning component — other code
//! sees ids, sets, and rectangles, never references into internal maps.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::admission::ConnectionAdmission;
use crate::batch::MessageBatcher;
use crate::chunk::ChunkStore;
use crate::config::Config;
use crate::protocol::ServerMessage;
use crate::region::RegionIndex;
use crate::space::SpaceAllocator;
use crate::storage::ChunkStorage;

// =============================================================================
// ROOM STATE
// =============================================================================

/// Per-room live state. Exists while any session is joined.
pub struct RoomState {
    pub chunks: ChunkStore,
    pub regions: RegionIndex,
    pub spaces: SpaceAllocator,
    /// Sessions currently joined to this room.
    pub members: HashSet<Uuid>,
}

impl RoomState {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            chunks: ChunkStore::new(config.chunk_size, config.consolidate_threshold),
            regions: RegionIndex::new(),
            spaces: SpaceAllocator::new(config.space_idle_timeout, config.spiral_max_steps),
            members: HashSet::new(),
        }
    }
}

// =============================================================================
// SESSIONS
// =============================================================================

/// One connected participant.
pub struct Session {
    pub room: String,
    /// Direct transport sender, used for latency-sensitive replies that
    /// bypass batching (pong, parse errors).
    pub tx: mpsc::Sender<ServerMessage>,
    pub connected_at: Instant,
}

/// Connection-id → session map. Insertion on admission, removal on
/// disconnect; removal cascades are orchestrated by the rooms service.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<Uuid, Session>,
}

impl SessionRegistry {
    pub fn insert(&mut self, conn: Uuid, session: Session) {
        self.sessions.insert(conn, session);
    }

    pub fn remove(&mut self, conn: Uuid) -> Option<Session> {
        self.sessions.remove(&conn)
    }

    #[must_use]
    pub fn room_of(&self, conn: Uuid) -> Option<String> {
        self.sessions.get(&conn).map(|s| s.room.clone())
    }

    #[must_use]
    pub fn sender_of(&self, conn: Uuid) -> Option<mpsc::Sender<ServerMessage>> {
        self.sessions.get(&conn).map(|s| s.tx.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state. Clone is required by Axum — all inner fields
/// are Arc-wrapped or internally shared.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: Arc<RwLock<HashMap<String, RoomState>>>,
    pub sessions: Arc<RwLock<SessionRegistry>>,
    pub batcher: MessageBatcher,
    pub admission: ConnectionAdmission,
    pub storage: Arc<dyn ChunkStorage>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config, storage: Arc<dyn ChunkStorage>) -> Self {
        let batcher = MessageBatcher::new(config.batch_max_size, config.batch_flush_interval);
        let admission = ConnectionAdmission::new(config.admission_capacity, config.admission_timeout);
        Self {
            config: Arc::new(config),
            rooms: Arc::new(RwLock::new(HashMap::new())),
            sessions: Arc::new(RwLock::new(SessionRegistry::default())),
            batcher,
            admission,
            storage,
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
