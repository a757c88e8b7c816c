//! Canvas service — the draw path and chunk snapshot delivery.
//!
//! DESIGN
//! ======
//! A drawing operation fans out in three resolutions: world point → chunk
//! ids (stroke bounding box, radius included) → region ids → subscriber
//! union. Every touched chunk records the full operation so each side of
//! a border rasterizes its own portion; the broadcast is deduplicated so
//! a session spanning several touched regions hears the stroke once.

use std::collections::HashSet;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::coords::{ChunkCoord, RegionCoord, chunks_touched};
use crate::protocol::{DrawOp, ServerMessage, now_ms};
use crate::state::AppState;

/// Record a draw operation and fan it out to region subscribers.
pub async fn handle_draw(state: &AppState, conn: Uuid, op: DrawOp) {
    let Some(room) = state.sessions.read().await.room_of(conn) else {
        return;
    };

    let touched = chunks_touched(&op, state.config.chunk_size);
    let now = now_ms();

    let targets = {
        let mut rooms = state.rooms.write().await;
        let Some(room_state) = rooms.get_mut(&room) else {
            return;
        };
        for coord in &touched {
            room_state.chunks.apply_operation(*coord, op.clone(), now);
        }
        // Drawing is a contribution: it refreshes and latches the lease.
        room_state.spaces.update_activity(conn, true);

        let regions: HashSet<RegionCoord> =
            touched.iter().map(|c| c.region(state.config.region_span)).collect();
        room_state.regions.subscribers_of_all(regions.iter())
    };

    debug!(%conn, chunks = touched.len(), targets = targets.len(), "draw fan-out");
    let msg = ServerMessage::RemoteDraw { session_id: conn, op };
    for target in targets {
        if target != conn {
            state.batcher.enqueue(target, msg.clone());
        }
    }
}

/// Deliver a chunk's transmission-ready snapshot, loading it from storage
/// on first touch.
pub async fn send_chunk(state: &AppState, conn: Uuid, chunk_id: ChunkCoord) {
    let Some(room) = state.sessions.read().await.room_of(conn) else {
        return;
    };

    // Fetch from storage outside the lock; applied only if still absent.
    let stored = match state.storage.load(&room, chunk_id).await {
        Ok(stored) => stored,
        Err(e) => {
            warn!(%room, coord = ?chunk_id, error = %e, "chunk load failed; serving blank");
            None
        }
    };

    let (encoded_raster, last_modified) = {
        let mut rooms = state.rooms.write().await;
        let Some(room_state) = rooms.get_mut(&room) else {
            return;
        };
        if !room_state.chunks.contains(chunk_id) {
            if let Some(stored) = stored {
                room_state.chunks.insert_loaded(chunk_id, &stored.encoded, stored.last_modified);
            }
        }
        room_state.chunks.snapshot(chunk_id)
    };

    state
        .batcher
        .enqueue(conn, ServerMessage::ChunkData { chunk_id, encoded_raster, last_modified });
}

/// Switch the session's region subscription.
pub async fn switch_region(state: &AppState, conn: Uuid, region: RegionCoord) {
    let Some(room) = state.sessions.read().await.room_of(conn) else {
        return;
    };
    let mut rooms = state.rooms.write().await;
    if let Some(room_state) = rooms.get_mut(&room) {
        room_state.regions.switch_region(conn, region);
        debug!(%conn, ?region, "region switched");
    }
}

#[cfg(test)]
#[path = "canvas_test.rs"]
mod tests;
