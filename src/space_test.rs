use super::*;

const IDLE: Duration = Duration::from_secs(300);
const MAX_STEPS: usize = 10_000;

fn allocator() -> SpaceAllocator {
    SpaceAllocator::new(IDLE, MAX_STEPS)
}

fn rects_overlap(a: Rect, b: Rect) -> bool {
    a.x < b.x + b.width && b.x < a.x + a.width && a.y < b.y + b.height && b.y < a.y + a.height
}

#[test]
fn first_two_assignments_fill_origin_then_neighbor() {
    let mut alloc = allocator();
    let now = Instant::now();

    let first = alloc.assign_at(Uuid::new_v4(), 800.0, 600.0, now);
    let second = alloc.assign_at(Uuid::new_v4(), 800.0, 600.0, now);

    assert_eq!(first.rect, Rect { x: 0.0, y: 0.0, width: 800.0, height: 600.0 });
    assert_eq!(second.rect, Rect { x: 800.0, y: 0.0, width: 800.0, height: 600.0 });
    assert!(first.evicted.is_empty());
    assert!(second.evicted.is_empty());
}

#[test]
fn assignments_without_release_are_pairwise_disjoint() {
    let mut alloc = allocator();
    let now = Instant::now();

    let rects: Vec<Rect> = (0..25)
        .map(|_| alloc.assign_at(Uuid::new_v4(), 800.0, 600.0, now).rect)
        .collect();

    for (i, a) in rects.iter().enumerate() {
        for b in &rects[i + 1..] {
            assert!(!rects_overlap(*a, *b), "{a:?} overlaps {b:?}");
        }
    }
    assert_eq!(alloc.len(), 25);
}

#[test]
fn reassign_releases_prior_space_first() {
    let mut alloc = allocator();
    let now = Instant::now();
    let owner = Uuid::new_v4();

    let first = alloc.assign_at(owner, 800.0, 600.0, now);
    let second = alloc.assign_at(owner, 800.0, 600.0, now);

    // The old cell was freed, so the owner lands on the origin cell again.
    assert_eq!(first.rect, second.rect);
    assert_eq!(alloc.len(), 1, "at most one active space per owner");
}

#[test]
fn idle_uncontributed_space_is_reclaimed() {
    let mut alloc = allocator();
    let start = Instant::now();
    let owner = Uuid::new_v4();

    alloc.assign_at(owner, 800.0, 600.0, start);

    // Not yet expired: nothing happens.
    assert!(alloc.reclaim_idle_at(start + IDLE).is_empty());

    let reclaimed = alloc.reclaim_idle_at(start + IDLE + Duration::from_secs(1));
    assert_eq!(reclaimed, vec![owner]);
    assert!(alloc.is_empty());
}

#[test]
fn contributed_space_is_never_reclaimed() {
    let mut alloc = allocator();
    let start = Instant::now();
    let owner = Uuid::new_v4();

    alloc.assign_at(owner, 800.0, 600.0, start);
    alloc.update_activity_at(owner, true, start);

    let much_later = start + IDLE * 1000;
    assert!(alloc.reclaim_idle_at(much_later).is_empty());
    assert!(alloc.lease_of(owner).is_some());
}

#[test]
fn activity_refresh_defers_reclaim() {
    let mut alloc = allocator();
    let start = Instant::now();
    let owner = Uuid::new_v4();

    alloc.assign_at(owner, 800.0, 600.0, start);
    let refreshed = start + IDLE;
    alloc.update_activity_at(owner, false, refreshed);

    assert!(alloc.reclaim_idle_at(start + IDLE + Duration::from_secs(1)).is_empty());
    let reclaimed = alloc.reclaim_idle_at(refreshed + IDLE + Duration::from_secs(1));
    assert_eq!(reclaimed, vec![owner]);
}

#[test]
fn search_takes_over_expired_cell_and_reports_eviction() {
    let mut alloc = allocator();
    let start = Instant::now();
    let idler = Uuid::new_v4();
    let claimant = Uuid::new_v4();

    alloc.assign_at(idler, 800.0, 600.0, start);

    let later = start + IDLE + Duration::from_secs(1);
    let assignment = alloc.assign_at(claimant, 800.0, 600.0, later);

    assert_eq!(assignment.rect.x, 0.0, "expired origin cell should be reused");
    assert_eq!(assignment.evicted, vec![idler]);
    assert!(alloc.lease_of(idler).is_none());
}

#[test]
fn explicit_release_ignores_contribution_state() {
    let mut alloc = allocator();
    let now = Instant::now();
    let owner = Uuid::new_v4();

    alloc.assign_at(owner, 800.0, 600.0, now);
    alloc.update_activity_at(owner, true, now);

    assert!(alloc.release(owner));
    assert!(!alloc.release(owner), "second release is a no-op");
    assert!(alloc.is_empty());
}

#[test]
fn exhausted_search_degrades_to_fallback_cell() {
    let mut alloc = SpaceAllocator::new(IDLE, 9);
    let now = Instant::now();

    // Fill the 3x3 block the bounded search can reach.
    for _ in 0..9 {
        let assignment = alloc.assign_at(Uuid::new_v4(), 100.0, 100.0, now);
        assert!(assignment.evicted.is_empty());
    }

    let first_overflow = Uuid::new_v4();
    let overflow = alloc.assign_at(first_overflow, 100.0, 100.0, now);
    assert_eq!(overflow.rect.x, 1_000_000.0);
    assert_eq!(overflow.rect.y, 1_000_000.0);
    assert!(overflow.evicted.is_empty());

    // A second exhaustion shares the fallback cell and displaces the tenant.
    let again = alloc.assign_at(Uuid::new_v4(), 100.0, 100.0, now);
    assert_eq!(again.rect.x, 1_000_000.0);
    assert_eq!(again.evicted, vec![first_overflow]);
}

#[test]
fn leases_reports_all_active_spaces() {
    let mut alloc = allocator();
    let now = Instant::now();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    alloc.assign_at(a, 800.0, 600.0, now);
    alloc.assign_at(b, 800.0, 600.0, now);

    let mut owners: Vec<Uuid> = alloc.leases().iter().map(|s| s.session_id).collect();
    owners.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(owners, expected);
}

#[test]
fn spiral_visits_inner_ring_exhaustively() {
    let cells: Vec<(i64, i64)> = spiral().take(9).collect();
    assert_eq!(cells[0], (0, 0));
    assert_eq!(cells[1], (1, 0));
    let ring: std::collections::HashSet<(i64, i64)> = cells[1..].iter().copied().collect();
    for x in -1..=1i64 {
        for y in -1..=1i64 {
            if (x, y) != (0, 0) {
                assert!(ring.contains(&(x, y)), "missing ring cell {:?}", (x, y));
            }
        }
    }
}
