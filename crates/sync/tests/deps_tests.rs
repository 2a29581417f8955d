//! Tests for the dependency tracker

use fastsync_sync::{DependencyTracker, DependentNode, NodeKind, SyncItem};

fn parent(tag: u8, missing_children: u32) -> DependentNode {
    DependentNode {
        item: SyncItem::new([tag; 32], NodeKind::State, 1, 1.0),
        payload: vec![tag],
        missing_children,
        is_account: false,
    }
}

#[test]
fn test_empty_tracker() {
    let tracker = DependencyTracker::new();
    assert!(tracker.is_empty());
    assert_eq!(tracker.len(), 0);
    assert!(!tracker.awaits(&[1; 32]));
}

#[test]
fn test_single_child_completion() {
    let mut tracker = DependencyTracker::new();
    let child = [9u8; 32];

    tracker.add_edge(child, [1; 32]);
    tracker.register_parent(parent(1, 1));
    assert!(tracker.awaits(&child));

    let completed = tracker.mark_saved(&child);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].item.hash, [1; 32]);
    assert!(tracker.is_empty());
}

#[test]
fn test_parent_waits_for_all_children() {
    let mut tracker = DependencyTracker::new();
    let (a, b) = ([10u8; 32], [11u8; 32]);

    tracker.add_edge(a, [1; 32]);
    tracker.add_edge(b, [1; 32]);
    tracker.register_parent(parent(1, 2));

    assert!(tracker.mark_saved(&a).is_empty());
    let completed = tracker.mark_saved(&b);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].missing_children, 0);
    assert!(tracker.is_empty());
}

#[test]
fn test_shared_child_unblocks_both_parents() {
    let mut tracker = DependencyTracker::new();
    let child = [42u8; 32];

    tracker.add_edge(child, [1; 32]);
    tracker.add_edge(child, [2; 32]);
    tracker.register_parent(parent(1, 1));
    tracker.register_parent(parent(2, 1));

    let mut completed = tracker.mark_saved(&child);
    completed.sort_by_key(|p| p.item.hash);
    assert_eq!(completed.len(), 2);
    assert_eq!(completed[0].item.hash, [1; 32]);
    assert_eq!(completed[1].item.hash, [2; 32]);
    assert!(tracker.is_empty());
}

#[test]
fn test_duplicate_edge_coalesces() {
    let mut tracker = DependencyTracker::new();
    let child = [5u8; 32];

    // The same parent linked twice to the same child decrements once.
    tracker.add_edge(child, [1; 32]);
    tracker.add_edge(child, [1; 32]);
    tracker.register_parent(parent(1, 1));

    let completed = tracker.mark_saved(&child);
    assert_eq!(completed.len(), 1);
    assert!(tracker.is_empty());
}

#[test]
fn test_mark_saved_without_waiters() {
    let mut tracker = DependencyTracker::new();
    assert!(tracker.mark_saved(&[1; 32]).is_empty());
}

#[test]
fn test_clear() {
    let mut tracker = DependencyTracker::new();
    tracker.add_edge([9; 32], [1; 32]);
    tracker.register_parent(parent(1, 1));

    tracker.clear();
    assert!(tracker.is_empty());
    assert!(tracker.mark_saved(&[9; 32]).is_empty());
}
