//! Space service — assignment orchestration and the reclaim sweep.
//!
//! DESIGN
//! ======
//! The allocator itself is a plain data structure; this module wires its
//! results to sessions: the claimant hears `spaceAssigned`, anyone
//! displaced hears `forceReload`, and the whole room hears the refreshed
//! layout. The reclaim sweep runs on a fixed cadence and only ever
//! touches leases that never contributed.

use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::protocol::ServerMessage;
use crate::services::rooms;
use crate::state::AppState;

/// Grant a space sized to the client viewport and notify everyone affected.
pub async fn assign_space(state: &AppState, conn: Uuid, width: f64, height: f64) {
    let Some(room) = state.sessions.read().await.room_of(conn) else {
        return;
    };
    let mut rooms_map = state.rooms.write().await;
    let Some(room_state) = rooms_map.get_mut(&room) else {
        return;
    };

    let assignment = room_state.spaces.assign(conn, width, height);
    info!(%conn, %room, rect = ?assignment.rect, evicted = assignment.evicted.len(), "space assigned");

    state.batcher.enqueue(conn, ServerMessage::SpaceAssigned { rect: assignment.rect });
    for evicted in assignment.evicted {
        state.batcher.enqueue(evicted, ServerMessage::ForceReload);
    }
    rooms::broadcast_space_update(state, room_state);
}

/// Explicit release; broadcasts the new layout when anything changed.
pub async fn release_space(state: &AppState, conn: Uuid) {
    let Some(room) = state.sessions.read().await.room_of(conn) else {
        return;
    };
    let mut rooms_map = state.rooms.write().await;
    let Some(room_state) = rooms_map.get_mut(&room) else {
        return;
    };
    if room_state.spaces.release(conn) {
        info!(%conn, %room, "space released");
        rooms::broadcast_space_update(state, room_state);
    }
}

/// Refresh the session's lease activity.
pub async fn record_activity(state: &AppState, conn: Uuid, contributed: bool) {
    let Some(room) = state.sessions.read().await.room_of(conn) else {
        return;
    };
    let mut rooms_map = state.rooms.write().await;
    if let Some(room_state) = rooms_map.get_mut(&room) {
        room_state.spaces.update_activity(conn, contributed);
    }
}

/// Spawn the periodic reclaim sweep. Returns a handle for shutdown.
pub fn spawn_reclaim_task(state: AppState) -> JoinHandle<()> {
    let interval = state.config.reclaim_interval;
    info!(interval_secs = interval.as_secs(), "space reclaim sweep configured");
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            reclaim_idle_spaces(&state).await;
        }
    })
}

/// One sweep across every room: reclaim idle uncontributed leases, tell
/// the evicted sessions to reload, and refresh the room layout.
pub async fn reclaim_idle_spaces(state: &AppState) {
    reclaim_idle_spaces_at(state, std::time::Instant::now()).await;
}

pub(crate) async fn reclaim_idle_spaces_at(state: &AppState, now: std::time::Instant) {
    let mut rooms_map = state.rooms.write().await;
    for (room, room_state) in rooms_map.iter_mut() {
        let reclaimed = room_state.spaces.reclaim_idle_at(now);
        if reclaimed.is_empty() {
            continue;
        }
        info!(%room, count = reclaimed.len(), "reclaimed idle spaces");
        for owner in reclaimed {
            state.batcher.enqueue(owner, ServerMessage::ForceReload);
        }
        rooms::broadcast_space_update(state, room_state);
    }
}

#[cfg(test)]
#[path = "spaces_test.rs"]
mod tests;
