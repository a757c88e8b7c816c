//! Region index — pub/sub registry mapping broadcast regions to sessions.
//!
//! DESIGN
//! ======
//! Regions are NxN chunk groups; a session subscribes to the region its
//! viewport sits in and receives every operation touching that region.
//! Membership is tracked in both directions so a region switch or a
//! disconnect is O(current memberships). A region with no subscribers is
//! removed immediately.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::coords::RegionCoord;

#[derive(Default)]
pub struct RegionIndex {
    subscribers: HashMap<RegionCoord, HashSet<Uuid>>,
    memberships: HashMap<Uuid, HashSet<RegionCoord>>,
}

impl RegionIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a session to a region.
    pub fn join(&mut self, session: Uuid, region: RegionCoord) {
        self.subscribers.entry(region).or_default().insert(session);
        self.memberships.entry(session).or_default().insert(region);
    }

    /// Unsubscribe a session from a region, dropping the region when empty.
    pub fn leave(&mut self, session: Uuid, region: RegionCoord) {
        if let Some(set) = self.subscribers.get_mut(&region) {
            set.remove(&session);
            if set.is_empty() {
                self.subscribers.remove(&region);
            }
        }
        if let Some(set) = self.memberships.get_mut(&session) {
            set.remove(&region);
            if set.is_empty() {
                self.memberships.remove(&session);
            }
        }
    }

    /// Leave every current region, then join exactly one. After any call
    /// sequence the session subscribes to precisely the latest region.
    pub fn switch_region(&mut self, session: Uuid, region: RegionCoord) {
        self.remove_session(session);
        self.join(session, region);
    }

    /// Drop every membership for a session (disconnect cascade).
    pub fn remove_session(&mut self, session: Uuid) {
        let Some(regions) = self.memberships.remove(&session) else {
            return;
        };
        for region in regions {
            if let Some(set) = self.subscribers.get_mut(&region) {
                set.remove(&session);
                if set.is_empty() {
                    self.subscribers.remove(&region);
                }
            }
        }
    }

    /// Subscribers of one region.
    #[must_use]
    pub fn subscribers(&self, region: RegionCoord) -> HashSet<Uuid> {
        self.subscribers.get(&region).cloned().unwrap_or_default()
    }

    /// Deduplicated union of subscribers across every touched region. An
    /// operation whose bounding box spans regions broadcasts exactly once
    /// per session.
    #[must_use]
    pub fn subscribers_of_all<'a>(&self, regions: impl IntoIterator<Item = &'a RegionCoord>) -> HashSet<Uuid> {
        let mut out = HashSet::new();
        for region in regions {
            if let Some(set) = self.subscribers.get(region) {
                out.extend(set.iter().copied());
            }
        }
        out
    }

    #[must_use]
    pub fn regions_of(&self, session: Uuid) -> HashSet<RegionCoord> {
        self.memberships.get(&session).cloned().unwrap_or_default()
    }

    /// Number of live (non-empty) regions.
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
#[path = "region_test.rs"]
mod tests;
