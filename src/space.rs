//! Space allocator — exclusive working areas on a virtual grid.
//!
//! DESIGN
//! ======
//! Each session gets one rectangular cell on an implicit grid whose cell
//! size is the requested width × height. Cells are found by a clockwise
//! square spiral from the origin: run lengths 1,1,2,2,3,3,… with a 90°
//! turn after each run, which walks every cell of each expanding ring, so
//! the first free cell found is among the nearest. Distinct cells cannot
//! overlap, which makes concurrently active spaces pairwise disjoint
//! without any rectangle intersection checks.
//!
//! A lease that has never produced a contribution and has sat idle past
//! the timeout is reclaimable, both by the periodic sweep and by an
//! incoming search that lands on its cell. Contributed leases are kept
//! until released or disconnected.
//!
//! TRADE-OFFS
//! ==========
//! When the bounded search exhausts without a free cell, a fixed far-away
//! fallback cell is returned instead of an error; simultaneous exhaustions
//! share that one cell, the later claimant evicting the earlier.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::protocol::{Rect, SpaceInfo};

/// Cell shared by every search that exhausts its step budget.
const FALLBACK_CELL: (i64, i64) = (10_000, 10_000);

/// One granted working area.
#[derive(Debug, Clone)]
pub struct SpaceLease {
    pub owner: Uuid,
    pub rect: Rect,
    pub claimed_at: Instant,
    pub last_activity: Instant,
    /// Latches true on first contribution; never reverts.
    pub has_contributed: bool,
}

/// Result of an assignment: the granted rectangle plus any sitting owners
/// evicted because their lease had expired under the new claimant.
#[derive(Debug)]
pub struct Assignment {
    pub rect: Rect,
    pub evicted: Vec<Uuid>,
}

pub struct SpaceAllocator {
    idle_timeout: Duration,
    max_steps: usize,
    cells: HashMap<(i64, i64), SpaceLease>,
    by_owner: HashMap<Uuid, (i64, i64)>,
}

impl SpaceAllocator {
    #[must_use]
    pub fn new(idle_timeout: Duration, max_steps: usize) -> Self {
        Self { idle_timeout, max_steps, cells: HashMap::new(), by_owner: HashMap::new() }
    }

    /// Grant the nearest free cell to `owner`, releasing any lease the
    /// owner already holds. Callers always receive a rectangle.
    pub fn assign(&mut self, owner: Uuid, width: f64, height: f64) -> Assignment {
        self.assign_at(owner, width, height, Instant::now())
    }

    pub(crate) fn assign_at(&mut self, owner: Uuid, width: f64, height: f64, now: Instant) -> Assignment {
        let width = width.max(1.0);
        let height = height.max(1.0);
        self.release(owner);

        let mut evicted = Vec::new();
        let cell = self
            .find_cell(now, &mut evicted)
            .unwrap_or_else(|| self.claim_fallback(&mut evicted));

        #[allow(clippy::cast_precision_loss)]
        let rect = Rect { x: cell.0 as f64 * width, y: cell.1 as f64 * height, width, height };
        let lease =
            SpaceLease { owner, rect, claimed_at: now, last_activity: now, has_contributed: false };
        self.cells.insert(cell, lease);
        self.by_owner.insert(owner, cell);

        Assignment { rect, evicted }
    }

    fn find_cell(&mut self, now: Instant, evicted: &mut Vec<Uuid>) -> Option<(i64, i64)> {
        for cell in spiral().take(self.max_steps) {
            let expired_owner = match self.cells.get(&cell) {
                None => None,
                Some(lease) if self.is_expired(lease, now) => Some(lease.owner),
                Some(_) => continue,
            };
            if let Some(owner) = expired_owner {
                evicted.push(owner);
                self.evict_cell(cell);
            }
            return Some(cell);
        }
        None
    }

    fn claim_fallback(&mut self, evicted: &mut Vec<Uuid>) -> (i64, i64) {
        // Shared fallback: a later exhausted search displaces the earlier
        // tenant rather than failing the caller.
        let tenant = self.cells.get(&FALLBACK_CELL).map(|lease| lease.owner);
        if let Some(owner) = tenant {
            evicted.push(owner);
            self.evict_cell(FALLBACK_CELL);
        }
        FALLBACK_CELL
    }

    fn evict_cell(&mut self, cell: (i64, i64)) {
        if let Some(lease) = self.cells.remove(&cell) {
            self.by_owner.remove(&lease.owner);
        }
    }

    fn is_expired(&self, lease: &SpaceLease, now: Instant) -> bool {
        !lease.has_contributed && now.duration_since(lease.last_activity) > self.idle_timeout
    }

    /// Refresh activity; `contributed` latches the contribution flag.
    pub fn update_activity(&mut self, owner: Uuid, contributed: bool) {
        self.update_activity_at(owner, contributed, Instant::now());
    }

    pub(crate) fn update_activity_at(&mut self, owner: Uuid, contributed: bool, now: Instant) {
        let Some(cell) = self.by_owner.get(&owner) else {
            return;
        };
        if let Some(lease) = self.cells.get_mut(cell) {
            lease.last_activity = now;
            if contributed {
                lease.has_contributed = true;
            }
        }
    }

    /// Release every lease idle past the timeout that never contributed.
    /// Returns the evicted owners so they can be told to re-request.
    pub fn reclaim_idle(&mut self) -> Vec<Uuid> {
        self.reclaim_idle_at(Instant::now())
    }

    pub(crate) fn reclaim_idle_at(&mut self, now: Instant) -> Vec<Uuid> {
        let expired: Vec<(i64, i64)> = self
            .cells
            .iter()
            .filter(|(_, lease)| self.is_expired(lease, now))
            .map(|(cell, _)| *cell)
            .collect();

        let mut owners = Vec::with_capacity(expired.len());
        for cell in expired {
            if let Some(lease) = self.cells.remove(&cell) {
                self.by_owner.remove(&lease.owner);
                owners.push(lease.owner);
            }
        }
        owners
    }

    /// Unconditional release, used on disconnect and explicit request.
    pub fn release(&mut self, owner: Uuid) -> bool {
        let Some(cell) = self.by_owner.remove(&owner) else {
            return false;
        };
        self.cells.remove(&cell);
        true
    }

    /// Every active lease, for `spaceUpdate` broadcasts.
    #[must_use]
    pub fn leases(&self) -> Vec<SpaceInfo> {
        self.cells
            .values()
            .map(|lease| SpaceInfo { session_id: lease.owner, rect: lease.rect })
            .collect()
    }

    #[must_use]
    pub fn lease_of(&self, owner: Uuid) -> Option<&SpaceLease> {
        self.by_owner.get(&owner).and_then(|cell| self.cells.get(cell))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Clockwise square spiral from the origin: right, down, left, up with run
/// lengths 1,1,2,2,3,3,… Yields (0,0) first and visits every cell of each
/// ring before moving outward.
fn spiral() -> impl Iterator<Item = (i64, i64)> {
    // (dx, dy) in screen orientation: +y is down, so right→down→left→up
    // turns clockwise.
    const DIRS: [(i64, i64); 4] = [(1, 0), (0, 1), (-1, 0), (0, -1)];

    let mut x = 0i64;
    let mut y = 0i64;
    let mut dir = 0usize;
    let mut run = 1i64;
    let mut remaining = 1i64;
    let mut legs_done = 0u8;
    let mut first = true;

    std::iter::from_fn(move || {
        if first {
            first = false;
            return Some((0, 0));
        }
        let (dx, dy) = DIRS[dir];
        x += dx;
        y += dy;
        remaining -= 1;
        if remaining == 0 {
            dir = (dir + 1) % 4;
            legs_done += 1;
            if legs_done == 2 {
                legs_done = 0;
                run += 1;
            }
            remaining = run;
        }
        Some((x, y))
    })
}

#[cfg(test)]
#[path = "space_test.rs"]
mod tests;
