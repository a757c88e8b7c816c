//! Room service — join/leave lifecycle and room-wide fan-out.
//!
//! DESIGN
//! ======
//! A room springs into existence when its first session joins and is
//! evicted from memory when its last session leaves. Eviction flushes
//! dirty chunks to storage first; if that flush fails the room is kept in
//! memory with dirty flags intact so the persistence sweep can retry
//! rather than losing strokes.

use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::chunk::DirtySnapshot;
use crate::protocol::ServerMessage;
use crate::state::{AppState, RoomState, Session};
use crate::storage::StoredChunk;

/// Register a session and add it to a room, creating the room on first
/// join. The joiner receives the room's current space layout.
pub async fn join_room(state: &AppState, conn: Uuid, room: &str, tx: mpsc::Sender<ServerMessage>) {
    {
        let mut sessions = state.sessions.write().await;
        sessions.insert(
            conn,
            Session { room: room.to_owned(), tx, connected_at: std::time::Instant::now() },
        );
    }

    let mut rooms = state.rooms.write().await;
    let room_state = rooms.entry(room.to_owned()).or_insert_with(|| RoomState::new(&state.config));
    room_state.members.insert(conn);

    let spaces = room_state.spaces.leases();
    info!(%conn, %room, members = room_state.members.len(), "session joined room");
    state.batcher.enqueue(conn, ServerMessage::SpaceUpdate { all_spaces: spaces });
}

/// Tear down a session: region memberships, space lease, room membership.
/// The last session out triggers a final flush and room eviction.
pub async fn leave_room(state: &AppState, conn: Uuid) {
    let Some(session) = state.sessions.write().await.remove(conn) else {
        return;
    };
    let room = session.room;

    let mut rooms = state.rooms.write().await;
    let Some(room_state) = rooms.get_mut(&room) else {
        return;
    };

    room_state.members.remove(&conn);
    room_state.regions.remove_session(conn);
    let released = room_state.spaces.release(conn);
    info!(%conn, %room, remaining = room_state.members.len(), "session left room");

    if room_state.members.is_empty() {
        let snapshots = room_state.chunks.take_dirty_snapshots();
        if snapshots.is_empty() {
            rooms.remove(&room);
            info!(%room, "evicted room from memory");
            return;
        }

        // Flush outside the lock; keep the room if anything failed so the
        // persistence sweep retries instead of dropping strokes.
        drop(rooms);
        let acked = save_snapshots(state, &room, &snapshots).await;

        let mut rooms = state.rooms.write().await;
        let Some(room_state) = rooms.get_mut(&room) else {
            return;
        };
        if !room_state.members.is_empty() {
            // Someone joined during the flush; just ack what was written.
            room_state.chunks.ack_flushed(&acked);
            return;
        }
        room_state.chunks.ack_flushed(&acked);
        if room_state.chunks.has_dirty() {
            error!(%room, "final flush incomplete; room retained for retry");
        } else {
            rooms.remove(&room);
            info!(%room, "evicted room from memory");
        }
    } else if released {
        broadcast_space_update(state, room_state);
    }
}

/// Enqueue a message for every member of a room, optionally excluding one.
pub fn broadcast(state: &AppState, room_state: &RoomState, msg: &ServerMessage, exclude: Option<Uuid>) {
    for member in &room_state.members {
        if exclude == Some(*member) {
            continue;
        }
        state.batcher.enqueue(*member, msg.clone());
    }
}

/// Broadcast the room's current space layout to every member.
pub fn broadcast_space_update(state: &AppState, room_state: &RoomState) {
    let msg = ServerMessage::SpaceUpdate { all_spaces: room_state.spaces.leases() };
    broadcast(state, room_state, &msg, None);
}

/// Persist snapshots one by one, returning the acks for those that stuck.
pub(crate) async fn save_snapshots(
    state: &AppState,
    room: &str,
    snapshots: &[DirtySnapshot],
) -> Vec<(crate::coords::ChunkCoord, u64)> {
    let mut acked = Vec::with_capacity(snapshots.len());
    for snap in snapshots {
        let stored = StoredChunk { encoded: snap.encoded.clone(), last_modified: snap.last_modified };
        match state.storage.save(room, snap.coord, stored).await {
            Ok(()) => acked.push((snap.coord, snap.revision)),
            Err(e) => error!(%room, coord = ?snap.coord, error = %e, "chunk save failed"),
        }
    }
    acked
}

#[cfg(test)]
#[path = "rooms_test.rs"]
mod tests;
