use super::*;

fn region(x: i32, y: i32) -> RegionCoord {
    RegionCoord { x, y }
}

#[test]
fn join_then_leave_garbage_collects() {
    let mut index = RegionIndex::new();
    let session = Uuid::new_v4();

    index.join(session, region(0, 0));
    assert_eq!(index.subscribers(region(0, 0)).len(), 1);
    assert_eq!(index.region_count(), 1);

    index.leave(session, region(0, 0));
    assert!(index.subscribers(region(0, 0)).is_empty());
    assert_eq!(index.region_count(), 0, "empty region must be dropped");
}

#[test]
fn switch_region_subscribes_to_exactly_the_latest() {
    let mut index = RegionIndex::new();
    let session = Uuid::new_v4();

    for (x, y) in [(0, 0), (1, 0), (1, 1), (-2, 3)] {
        index.switch_region(session, region(x, y));
    }

    assert_eq!(index.regions_of(session), HashSet::from([region(-2, 3)]));
    assert!(index.subscribers(region(1, 1)).is_empty());
    assert!(index.subscribers(region(-2, 3)).contains(&session));
    assert_eq!(index.region_count(), 1);
}

#[test]
fn switch_to_same_region_is_idempotent() {
    let mut index = RegionIndex::new();
    let session = Uuid::new_v4();

    index.switch_region(session, region(2, 2));
    index.switch_region(session, region(2, 2));

    assert_eq!(index.regions_of(session).len(), 1);
    assert_eq!(index.subscribers(region(2, 2)).len(), 1);
}

#[test]
fn union_across_touched_regions_deduplicates() {
    let mut index = RegionIndex::new();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    // Session A sits in both touched regions; it must appear once.
    index.join(a, region(0, 0));
    index.join(a, region(1, 0));
    index.join(b, region(1, 0));

    let touched = [region(0, 0), region(1, 0)];
    let targets = index.subscribers_of_all(touched.iter());
    assert_eq!(targets, HashSet::from([a, b]));
}

#[test]
fn remove_session_clears_all_memberships() {
    let mut index = RegionIndex::new();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    index.join(a, region(0, 0));
    index.join(a, region(5, 5));
    index.join(b, region(0, 0));

    index.remove_session(a);

    assert!(index.regions_of(a).is_empty());
    assert_eq!(index.subscribers(region(0, 0)), HashSet::from([b]));
    assert_eq!(index.region_count(), 1, "region (5,5) should be gone");
}

#[test]
fn subscribers_of_unknown_region_is_empty() {
    let index = RegionIndex::new();
    assert!(index.subscribers(region(9, 9)).is_empty());
}
