//! Wire protocol — tagged message envelopes for the drawing transport.
//!
//! DESIGN
//! ======
//! Every message on the socket is one variant of a tagged-union enum,
//! discriminated by a `type` field. Inbound and outbound directions are
//! separate enums so dispatch is a single exhaustive `match` per direction
//! and the compiler flags any unhandled message kind.
//!
//! The `batch` variant is the only envelope that nests other messages: the
//! batcher wraps coalesced outbound messages into one `batch` per flush.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coords::{ChunkCoord, RegionCoord};

// =============================================================================
// TYPES
// =============================================================================

/// Stroke lifecycle marker carried on every draw operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawPhase {
    Start,
    Draw,
    End,
}

/// One drawing operation as sent by a client. World coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawOp {
    pub phase: DrawPhase,
    pub x: f64,
    pub y: f64,
    /// Stroke color, `#rrggbb`.
    pub color: String,
    /// Stroke diameter in pixels.
    pub size: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_y: Option<f64>,
}

/// Axis-aligned rectangle in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// A granted working area, as broadcast in `spaceUpdate`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceInfo {
    pub session_id: Uuid,
    pub rect: Rect,
}

// =============================================================================
// INBOUND
// =============================================================================

/// Messages a client may send. One dispatch match covers them all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Draw(DrawOp),
    #[serde(rename_all = "camelCase")]
    RequestSpace { viewport_width: f64, viewport_height: f64 },
    #[serde(rename_all = "camelCase")]
    SwitchRegion { region_id: RegionCoord },
    #[serde(rename_all = "camelCase")]
    Activity { is_drawing: bool },
    ReleaseSpace,
    #[serde(rename_all = "camelCase")]
    RequestChunk { chunk_id: ChunkCoord },
    Ping { timestamp: i64 },
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// Messages the server may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    SpaceAssigned {
        rect: Rect,
    },
    #[serde(rename_all = "camelCase")]
    SpaceUpdate { all_spaces: Vec<SpaceInfo> },
    #[serde(rename_all = "camelCase")]
    RemoteDraw {
        session_id: Uuid,
        #[serde(flatten)]
        op: DrawOp,
    },
    #[serde(rename_all = "camelCase")]
    ChunkData {
        chunk_id: ChunkCoord,
        encoded_raster: String,
        last_modified: i64,
    },
    /// Sent when a session's space was reclaimed; the client must re-request.
    ForceReload,
    /// Coalescing envelope: ordered inner messages plus flush timestamp.
    Batch { messages: Vec<ServerMessage>, ts: i64 },
    Pong { timestamp: i64 },
    /// Typed reply to a malformed or unprocessable inbound message.
    Error { message: String },
}

// =============================================================================
// TIME
// =============================================================================

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// TESTS
// =============================================================================
