use super::*;
use crate::chunk::decode_raster;
use crate::protocol::DrawPhase;
use crate::state::test_helpers::{join_session, test_app_state};
use crate::storage::StoredChunk;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

async fn expect_message<F>(rx: &mut mpsc::Receiver<ServerMessage>, what: &str, pred: F) -> ServerMessage
where
    F: Fn(&ServerMessage) -> bool,
{
    let deadline = Duration::from_millis(500);
    let found = timeout(deadline, async {
        loop {
            let Some(envelope) = rx.recv().await else {
                panic!("channel closed while waiting for {what}");
            };
            let inner = match envelope {
                ServerMessage::Batch { messages, .. } => messages,
                other => vec![other],
            };
            if let Some(hit) = inner.into_iter().find(&pred) {
                return hit;
            }
        }
    })
    .await;
    found.unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

async fn assert_no_message<F>(rx: &mut mpsc::Receiver<ServerMessage>, what: &str, pred: F)
where
    F: Fn(&ServerMessage) -> bool,
{
    // Elapsing without a match is the success path.
    let _ = timeout(Duration::from_millis(150), async {
        loop {
            let Some(envelope) = rx.recv().await else {
                return;
            };
            let inner = match envelope {
                ServerMessage::Batch { messages, .. } => messages,
                other => vec![other],
            };
            if inner.iter().any(&pred) {
                panic!("unexpected {what}");
            }
        }
    })
    .await;
}

fn draw_op(x: f64, y: f64) -> DrawOp {
    DrawOp { phase: DrawPhase::Draw, x, y, color: "#ff0000".into(), size: 4.0, prev_x: None, prev_y: None }
}

fn is_remote_draw(msg: &ServerMessage) -> bool {
    matches!(msg, ServerMessage::RemoteDraw { .. })
}

// Test config: chunk_size 64, region_span 2 → region (0,0) covers world
// x,y in [0, 128).

#[tokio::test]
async fn draw_reaches_region_subscriber() {
    let state = test_app_state();
    let (a, _rx_a) = join_session(&state, "lobby").await;
    let (b, mut rx_b) = join_session(&state, "lobby").await;

    switch_region(&state, b, RegionCoord { x: 0, y: 0 }).await;
    handle_draw(&state, a, draw_op(10.0, 10.0)).await;

    let msg = expect_message(&mut rx_b, "remoteDraw", is_remote_draw).await;
    let ServerMessage::RemoteDraw { session_id, op } = msg else { unreachable!() };
    assert_eq!(session_id, a);
    assert_eq!(op.x, 10.0);
    assert_eq!(op.color, "#ff0000");
}

#[tokio::test]
async fn drawer_does_not_hear_its_own_stroke() {
    let state = test_app_state();
    let (a, mut rx_a) = join_session(&state, "lobby").await;

    switch_region(&state, a, RegionCoord { x: 0, y: 0 }).await;
    handle_draw(&state, a, draw_op(10.0, 10.0)).await;

    assert_no_message(&mut rx_a, "echo of own stroke", is_remote_draw).await;
}

#[tokio::test]
async fn unsubscribed_session_hears_nothing() {
    let state = test_app_state();
    let (a, _rx_a) = join_session(&state, "lobby").await;
    let (b, mut rx_b) = join_session(&state, "lobby").await;

    switch_region(&state, b, RegionCoord { x: 5, y: 5 }).await;
    handle_draw(&state, a, draw_op(10.0, 10.0)).await;

    assert_no_message(&mut rx_b, "stroke outside subscribed region", is_remote_draw).await;
}

#[tokio::test]
async fn stroke_spanning_regions_reaches_both_subscriber_sets() {
    let state = test_app_state();
    let (a, _rx_a) = join_session(&state, "lobby").await;
    let (b, mut rx_b) = join_session(&state, "lobby").await;
    let (c, mut rx_c) = join_session(&state, "lobby").await;

    switch_region(&state, b, RegionCoord { x: 0, y: 0 }).await;
    switch_region(&state, c, RegionCoord { x: 1, y: 0 }).await;

    // Segment from world x=100 (region 0) to x=140 (region 1).
    let mut op = draw_op(140.0, 10.0);
    op.prev_x = Some(100.0);
    op.prev_y = Some(10.0);
    handle_draw(&state, a, op).await;

    expect_message(&mut rx_b, "remoteDraw in region (0,0)", is_remote_draw).await;
    expect_message(&mut rx_c, "remoteDraw in region (1,0)", is_remote_draw).await;
}

#[tokio::test]
async fn draw_latches_contribution_on_the_lease() {
    let state = test_app_state();
    let (a, _rx_a) = join_session(&state, "lobby").await;

    crate::services::spaces::assign_space(&state, a, 800.0, 600.0).await;
    handle_draw(&state, a, draw_op(10.0, 10.0)).await;

    let rooms = state.rooms.read().await;
    let lease = rooms.get("lobby").expect("room").spaces.lease_of(a).expect("lease");
    assert!(lease.has_contributed);
}

#[tokio::test]
async fn chunk_request_serves_decodable_raster() {
    let state = test_app_state();
    let (a, mut rx_a) = join_session(&state, "lobby").await;

    handle_draw(&state, a, draw_op(32.0, 32.0)).await;
    send_chunk(&state, a, ChunkCoord { x: 0, y: 0 }).await;

    let msg = expect_message(&mut rx_a, "chunkData", |m| matches!(m, ServerMessage::ChunkData { .. })).await;
    let ServerMessage::ChunkData { chunk_id, encoded_raster, last_modified } = msg else {
        unreachable!()
    };
    assert_eq!(chunk_id, ChunkCoord { x: 0, y: 0 });
    assert!(last_modified > 0);

    let raster = decode_raster(&encoded_raster).expect("decode");
    let size = state.config.chunk_size;
    assert_eq!(raster.len(), size as usize * size as usize * 4);
    assert_eq!(crate::chunk::pixel_at(&raster, size, 32, 32), [0xFF, 0x00, 0x00, 0xFF]);
}

#[tokio::test]
async fn chunk_request_hydrates_from_storage() {
    let state = test_app_state();
    let size = state.config.chunk_size;
    let coord = ChunkCoord { x: 7, y: -2 };

    // A previous run left a marked raster in storage.
    let mut raster = vec![0xFF; size as usize * size as usize * 4];
    raster[0] = 0x01;
    state
        .storage
        .save("lobby", coord, StoredChunk { encoded: crate::chunk::encode_raster(&raster), last_modified: 99 })
        .await
        .expect("seed storage");

    let (a, mut rx_a) = join_session(&state, "lobby").await;
    send_chunk(&state, a, coord).await;

    let msg = expect_message(&mut rx_a, "chunkData", |m| matches!(m, ServerMessage::ChunkData { .. })).await;
    let ServerMessage::ChunkData { encoded_raster, last_modified, .. } = msg else {
        unreachable!()
    };
    assert_eq!(last_modified, 99);
    assert_eq!(decode_raster(&encoded_raster).expect("decode")[0], 0x01);
}

#[tokio::test]
async fn switch_region_replaces_subscription() {
    let state = test_app_state();
    let (a, _rx_a) = join_session(&state, "lobby").await;
    let (b, mut rx_b) = join_session(&state, "lobby").await;

    switch_region(&state, b, RegionCoord { x: 0, y: 0 }).await;
    switch_region(&state, b, RegionCoord { x: 9, y: 9 }).await;

    handle_draw(&state, a, draw_op(10.0, 10.0)).await;
    assert_no_message(&mut rx_b, "stroke in abandoned region", is_remote_draw).await;
}
