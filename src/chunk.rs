//! Chunk store — spatial tiles holding drawing state.
//!
//! DESIGN
//! ======
//! Each chunk is an RGBA raster plus an append-only operation log. Drawing
//! appends to the log; once the log passes a threshold it is consolidated:
//! every logged stroke is rasterized into the pixel buffer, then the log is
//! cleared. Snapshots consolidate first, so the encoded raster always
//! reflects every applied operation.
//!
//! ERROR HANDLING
//! ==============
//! Dirty flags are cleared only after the persistence layer confirms a
//! write, and only when the chunk was not modified again after the snapshot
//! was taken. Unknown colors are skipped during rasterization rather than
//! failing the whole log.

use std::collections::HashMap;
use std::io::{Read, Write};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use crate::coords::ChunkCoord;
use crate::protocol::DrawOp;

const BYTES_PER_PIXEL: usize = 4;
const BACKGROUND: u8 = 0xFF;

// =============================================================================
// RASTER CODEC
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RasterCodecError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("deflate error: {0}")]
    Deflate(#[from] std::io::Error),
}

/// Deflate-compress and base64-encode a raster for transmission or storage.
#[must_use]
pub fn encode_raster(raster: &[u8]) -> String {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::fast());
    // Writing to a Vec cannot fail; fall back to the raw bytes if it somehow does.
    let compressed = encoder
        .write_all(raster)
        .and_then(|()| encoder.finish())
        .unwrap_or_else(|_| raster.to_vec());
    BASE64.encode(compressed)
}

/// Inverse of [`encode_raster`].
///
/// # Errors
///
/// Returns an error if the input is not valid base64 or valid deflate data.
pub fn decode_raster(encoded: &str) -> Result<Vec<u8>, RasterCodecError> {
    let compressed = BASE64.decode(encoded)?;
    let mut decoder = DeflateDecoder::new(compressed.as_slice());
    let mut raster = Vec::new();
    decoder.read_to_end(&mut raster)?;
    Ok(raster)
}

// =============================================================================
// CHUNK
// =============================================================================

/// One fixed-size tile of the canvas.
pub struct Chunk {
    raster: Vec<u8>,
    ops: Vec<DrawOp>,
    dirty: bool,
    last_modified: i64,
    /// Bumped on every applied operation; used to ack persistence flushes.
    revision: u64,
}

impl Chunk {
    fn blank(chunk_size: u32) -> Self {
        let pixels = chunk_size as usize * chunk_size as usize;
        Self {
            raster: vec![BACKGROUND; pixels * BYTES_PER_PIXEL],
            ops: Vec::new(),
            dirty: false,
            last_modified: 0,
            revision: 0,
        }
    }

    #[must_use]
    pub fn op_log_len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[must_use]
    pub fn last_modified(&self) -> i64 {
        self.last_modified
    }

    /// Composite the operation log into the raster, then clear the log.
    /// Safe to call repeatedly; an empty log is a no-op.
    fn consolidate(&mut self, origin: (f64, f64), chunk_size: u32) {
        for op in &self.ops {
            rasterize(&mut self.raster, chunk_size, origin, op);
        }
        self.ops.clear();
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Snapshot of one dirty chunk, taken under the store lock and persisted
/// outside it.
#[derive(Debug, Clone)]
pub struct DirtySnapshot {
    pub coord: ChunkCoord,
    pub encoded: String,
    pub last_modified: i64,
    pub revision: u64,
}

/// Spatial map of chunks for a single room. Lazy creation, append-only
/// logs, threshold-triggered consolidation.
pub struct ChunkStore {
    chunk_size: u32,
    consolidate_threshold: usize,
    chunks: HashMap<ChunkCoord, Chunk>,
}

impl ChunkStore {
    #[must_use]
    pub fn new(chunk_size: u32, consolidate_threshold: usize) -> Self {
        Self { chunk_size, consolidate_threshold, chunks: HashMap::new() }
    }

    #[must_use]
    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.chunks.contains_key(&coord)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Existing chunk, or a freshly created blank one. Never resets state.
    pub fn get_or_create(&mut self, coord: ChunkCoord) -> &Chunk {
        let size = self.chunk_size;
        self.chunks.entry(coord).or_insert_with(|| Chunk::blank(size))
    }

    /// Adopt a chunk raster loaded from storage. Skipped when the chunk is
    /// already resident (memory is authoritative) or the decoded raster has
    /// the wrong size.
    pub fn insert_loaded(&mut self, coord: ChunkCoord, encoded: &str, last_modified: i64) -> bool {
        if self.chunks.contains_key(&coord) {
            return false;
        }
        let expected = self.chunk_size as usize * self.chunk_size as usize * BYTES_PER_PIXEL;
        match decode_raster(encoded) {
            Ok(raster) if raster.len() == expected => {
                let mut chunk = Chunk::blank(self.chunk_size);
                chunk.raster = raster;
                chunk.last_modified = last_modified;
                self.chunks.insert(coord, chunk);
                true
            }
            Ok(raster) => {
                tracing::warn!(?coord, len = raster.len(), expected, "stored raster has wrong size; ignoring");
                false
            }
            Err(e) => {
                tracing::warn!(?coord, error = %e, "stored raster undecodable; ignoring");
                false
            }
        }
    }

    /// Append an operation to the chunk's log, marking it dirty. Crossing
    /// the log threshold consolidates into the raster.
    pub fn apply_operation(&mut self, coord: ChunkCoord, op: DrawOp, now_ms: i64) {
        let size = self.chunk_size;
        let threshold = self.consolidate_threshold;
        let chunk = self.chunks.entry(coord).or_insert_with(|| Chunk::blank(size));
        chunk.ops.push(op);
        chunk.dirty = true;
        chunk.last_modified = now_ms;
        chunk.revision += 1;
        if chunk.ops.len() > threshold {
            chunk.consolidate(coord.origin(size), size);
        }
    }

    /// Transmission-ready representation: consolidated raster, encoded, plus
    /// the last-modified timestamp. Creates the chunk if absent.
    pub fn snapshot(&mut self, coord: ChunkCoord) -> (String, i64) {
        let size = self.chunk_size;
        let chunk = self.chunks.entry(coord).or_insert_with(|| Chunk::blank(size));
        chunk.consolidate(coord.origin(size), size);
        (encode_raster(&chunk.raster), chunk.last_modified)
    }

    /// Encode every dirty chunk for persistence. Dirty flags stay set until
    /// [`ChunkStore::ack_flushed`] confirms the writes.
    #[must_use]
    pub fn take_dirty_snapshots(&mut self) -> Vec<DirtySnapshot> {
        let size = self.chunk_size;
        let mut out = Vec::new();
        for (coord, chunk) in &mut self.chunks {
            if !chunk.dirty {
                continue;
            }
            chunk.consolidate(coord.origin(size), size);
            out.push(DirtySnapshot {
                coord: *coord,
                encoded: encode_raster(&chunk.raster),
                last_modified: chunk.last_modified,
                revision: chunk.revision,
            });
        }
        out
    }

    /// Clear dirty flags for persisted chunks that were not modified again
    /// after their snapshot was taken.
    pub fn ack_flushed(&mut self, flushed: &[(ChunkCoord, u64)]) {
        for (coord, revision) in flushed {
            if let Some(chunk) = self.chunks.get_mut(coord) {
                if chunk.revision == *revision {
                    chunk.dirty = false;
                }
            }
        }
    }

    #[must_use]
    pub fn has_dirty(&self) -> bool {
        self.chunks.values().any(|c| c.dirty)
    }
}

// =============================================================================
// RASTERIZATION
// =============================================================================

fn parse_color(color: &str) -> Option<[u8; 3]> {
    let hex = color.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some([r, g, b])
}

/// Stamp one stroke segment into a chunk-local raster. Discs of the stroke
/// radius are placed at ≤1px intervals along the segment, which keeps the
/// result independent of how a stroke was split across events.
fn rasterize(raster: &mut [u8], chunk_size: u32, origin: (f64, f64), op: &DrawOp) {
    let Some(rgb) = parse_color(&op.color) else {
        return;
    };
    let radius = (op.size / 2.0).max(0.5);
    let x1 = op.x - origin.0;
    let y1 = op.y - origin.1;
    let x0 = op.prev_x.map_or(x1, |x| x - origin.0);
    let y0 = op.prev_y.map_or(y1, |y| y - origin.1);

    let length = (x1 - x0).hypot(y1 - y0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let steps = length.ceil().max(0.0) as usize;
    for i in 0..=steps {
        #[allow(clippy::cast_precision_loss)]
        let t = if steps == 0 { 0.0 } else { i as f64 / steps as f64 };
        stamp_disc(raster, chunk_size, x0 + (x1 - x0) * t, y0 + (y1 - y0) * t, radius, rgb);
    }
}

#[allow(clippy::cast_possible_truncation)]
fn stamp_disc(raster: &mut [u8], chunk_size: u32, cx: f64, cy: f64, radius: f64, rgb: [u8; 3]) {
    let size = i64::from(chunk_size);
    let min_x = ((cx - radius).floor() as i64).max(0);
    let max_x = ((cx + radius).ceil() as i64).min(size - 1);
    let min_y = ((cy - radius).floor() as i64).max(0);
    let max_y = ((cy + radius).ceil() as i64).min(size - 1);
    let r_sq = radius * radius;

    for py in min_y..=max_y {
        for px in min_x..=max_x {
            #[allow(clippy::cast_precision_loss)]
            let dx = px as f64 + 0.5 - cx;
            #[allow(clippy::cast_precision_loss)]
            let dy = py as f64 + 0.5 - cy;
            if dx * dx + dy * dy <= r_sq {
                #[allow(clippy::cast_sign_loss)]
                let idx = (py * size + px) as usize * BYTES_PER_PIXEL;
                raster[idx..idx + 3].copy_from_slice(&rgb);
                raster[idx + 3] = 0xFF;
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn pixel_at(raster: &[u8], chunk_size: u32, x: u32, y: u32) -> [u8; 4] {
    let idx = (y as usize * chunk_size as usize + x as usize) * BYTES_PER_PIXEL;
    [raster[idx], raster[idx + 1], raster[idx + 2], raster[idx + 3]]
}

#[cfg(test)]
#[path = "chunk_test.rs"]
mod tests;
