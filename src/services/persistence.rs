//! Persistence service — background flush for dirty chunks.
//!
//! DESIGN
//! ======
//! A background task snapshots every dirty chunk under the room lock,
//! performs storage I/O lock-free, then acknowledges the writes. Dirty
//! flags are cleared only for chunks unmodified since their snapshot, so
//! a stroke landing mid-flush is flushed again next cycle.
//!
//! ERROR HANDLING
//! ==============
//! Storage failures are logged and the affected chunks stay dirty for the
//! next sweep. Memory remains authoritative; chunks never flushed before
//! shutdown are lost, which is the documented durability bound.

use tokio::task::JoinHandle;
use tracing::info;

use crate::chunk::DirtySnapshot;
use crate::services::rooms::save_snapshots;
use crate::state::AppState;

/// Spawn the background flush task. Returns a handle for shutdown.
pub fn spawn_persistence_task(state: AppState) -> JoinHandle<()> {
    let interval = state.config.chunk_flush_interval;
    info!(?interval, "chunk persistence flush configured");
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            flush_all_dirty(&state).await;
        }
    })
}

async fn flush_all_dirty(state: &AppState) {
    // Snapshot dirty chunks under the lock, then write lock-free.
    let batches: Vec<(String, Vec<DirtySnapshot>)> = {
        let mut rooms = state.rooms.write().await;
        rooms
            .iter_mut()
            .filter_map(|(room, room_state)| {
                let snapshots = room_state.chunks.take_dirty_snapshots();
                if snapshots.is_empty() { None } else { Some((room.clone(), snapshots)) }
            })
            .collect()
    };

    for (room, snapshots) in batches {
        let acked = save_snapshots(state, &room, &snapshots).await;

        let mut rooms = state.rooms.write().await;
        if let Some(room_state) = rooms.get_mut(&room) {
            room_state.chunks.ack_flushed(&acked);
        }
    }
}

#[cfg(test)]
#[path = "persistence_test.rs"]
mod tests;
