//! Chunk and region coordinate derivation.
//!
//! Chunk identity is a pure function of world position: floor-divide by the
//! chunk size. Region identity floor-divides chunk indices by the region
//! span. Both use euclidean division so negative world space maps the same
//! way as positive.

use serde::{Deserialize, Serialize};

use crate::protocol::DrawOp;

/// Index of a fixed-size square tile of world space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub x: i32,
    pub y: i32,
}

/// Index of an NxN group of chunks used as the pub/sub unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionCoord {
    pub x: i32,
    pub y: i32,
}

impl ChunkCoord {
    /// Chunk containing a world-space point.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn containing(world_x: f64, world_y: f64, chunk_size: u32) -> Self {
        let size = f64::from(chunk_size);
        Self { x: (world_x / size).floor() as i32, y: (world_y / size).floor() as i32 }
    }

    /// World-space origin (top-left corner) of this chunk.
    #[must_use]
    pub fn origin(self, chunk_size: u32) -> (f64, f64) {
        let size = f64::from(chunk_size);
        (f64::from(self.x) * size, f64::from(self.y) * size)
    }

    /// Region this chunk belongs to.
    #[must_use]
    pub fn region(self, region_span: i32) -> RegionCoord {
        RegionCoord { x: self.x.div_euclid(region_span), y: self.y.div_euclid(region_span) }
    }
}

/// Chunks overlapped by an operation's bounding box, stroke radius included.
///
/// A stroke segment may cross chunk borders; every overlapped chunk records
/// the operation so each can rasterize its own portion.
#[must_use]
pub fn chunks_touched(op: &DrawOp, chunk_size: u32) -> Vec<ChunkCoord> {
    let radius = (op.size / 2.0).max(0.0);
    let x0 = op.prev_x.unwrap_or(op.x);
    let y0 = op.prev_y.unwrap_or(op.y);

    let min = ChunkCoord::containing(op.x.min(x0) - radius, op.y.min(y0) - radius, chunk_size);
    let max = ChunkCoord::containing(op.x.max(x0) + radius, op.y.max(y0) + radius, chunk_size);

    let mut out = Vec::with_capacity(((max.x - min.x + 1) * (max.y - min.y + 1)).unsigned_abs() as usize);
    for y in min.y..=max.y {
        for x in min.x..=max.x {
            out.push(ChunkCoord { x, y });
        }
    }
    out
}
