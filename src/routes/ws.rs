//! WebSocket handler — admission, dispatch, liveness, cleanup.
//!
//! DESIGN
//! ======
//! The upgrade request passes the admission gate before the socket is
//! accepted; a queue timeout is answered with plain HTTP so the client
//! can retry. Once upgraded, the connection runs a `select!` loop:
//! - Incoming messages → parse + exhaustive dispatch by tagged type
//! - Batched envelopes from the batcher → forward to the socket
//! - Heartbeat ticks → terminate after too many silent intervals
//!
//! Fan-out never touches the socket directly: services enqueue into the
//! batcher, and only this loop writes to its own socket. Direct replies
//! (pong, parse errors) skip the batcher to keep latency measurements
//! honest.
//!
//! LIFECYCLE
//! =========
//! 1. Admission gate (FIFO queue, timeout → 503)
//! 2. Register transport + join room → initial `spaceUpdate`
//! 3. Message loop
//! 4. Close → leave room, drop pending batches, free admission slot

use std::collections::HashMap;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::admission::AdmissionOutcome;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::services;
use crate::state::AppState;

const DEFAULT_ROOM: &str = "lobby";

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let room = params.get("room").cloned().unwrap_or_else(|| DEFAULT_ROOM.to_owned());
    let conn_id = Uuid::new_v4();

    match state.admission.admit(conn_id).await {
        AdmissionOutcome::Admitted => {}
        AdmissionOutcome::TimedOut => {
            info!(%conn_id, "admission queue timeout");
            return (StatusCode::SERVICE_UNAVAILABLE, "connection queue timeout").into_response();
        }
    }

    ws.on_upgrade(move |socket| run_ws(socket, state, conn_id, room))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, conn_id: Uuid, room: String) {
    // Per-connection channel carrying batched envelopes to this socket.
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(256);
    state.batcher.register(conn_id, tx.clone());
    services::rooms::join_room(&state, conn_id, &room, tx).await;

    info!(%conn_id, %room, "ws: session connected");

    let mut heartbeat = tokio::time::interval(state.config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let silence_limit = state.config.heartbeat_interval * state.config.heartbeat_missed_limit;
    let mut last_heard = Instant::now();

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        last_heard = Instant::now();
                        let replies = dispatch(&state, conn_id, &text).await;
                        let mut closed = false;
                        for reply in replies {
                            if send_message(&mut socket, &reply).await.is_err() {
                                closed = true;
                                break;
                            }
                        }
                        if closed {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(envelope) = rx.recv() => {
                if send_message(&mut socket, &envelope).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if last_heard.elapsed() > silence_limit {
                    warn!(%conn_id, silent_for = ?last_heard.elapsed(), "ws: heartbeat lost; terminating");
                    break;
                }
            }
        }
    }

    // Cleanup cascade: room/regions/space first, then transport, then the
    // admission slot so the next queued connection can start.
    services::rooms::leave_room(&state, conn_id).await;
    state.batcher.remove(conn_id);
    state.admission.release(conn_id);
    info!(%conn_id, "ws: session disconnected");
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Parse one inbound message and apply it. Returns direct replies for this
/// socket; everything room-facing goes through the batcher.
async fn dispatch(state: &AppState, conn_id: Uuid, text: &str) -> Vec<ServerMessage> {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(%conn_id, error = %e, "ws: malformed inbound message");
            return vec![ServerMessage::Error { message: format!("malformed message: {e}") }];
        }
    };

    match msg {
        ClientMessage::Draw(op) => {
            services::canvas::handle_draw(state, conn_id, op).await;
            vec![]
        }
        ClientMessage::RequestSpace { viewport_width, viewport_height } => {
            services::spaces::assign_space(state, conn_id, viewport_width, viewport_height).await;
            vec![]
        }
        ClientMessage::SwitchRegion { region_id } => {
            services::canvas::switch_region(state, conn_id, region_id).await;
            vec![]
        }
        ClientMessage::Activity { is_drawing } => {
            services::spaces::record_activity(state, conn_id, is_drawing).await;
            vec![]
        }
        ClientMessage::ReleaseSpace => {
            services::spaces::release_space(state, conn_id).await;
            vec![]
        }
        ClientMessage::RequestChunk { chunk_id } => {
            services::canvas::send_chunk(state, conn_id, chunk_id).await;
            vec![]
        }
        ClientMessage::Ping { timestamp } => {
            vec![ServerMessage::Pong { timestamp }]
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_message(socket: &mut WebSocket, msg: &ServerMessage) -> Result<(), ()> {
    let json = match serde_json::to_string(msg) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize outbound message");
            return Err(());
        }
    };
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
