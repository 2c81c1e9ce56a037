use super::*;

// ============================================================================
// Construction tests
// ============================================================================

#[test]
fn test_new_is_empty() {
    let set: SortedSet<u32> = SortedSet::new();
    assert!(set.is_empty());
    assert_eq!(set.len(), 0);
}

#[test]
fn test_from_vec_sorts() {
    let set = SortedSet::from_vec(vec![3u32, 1, 2]);
    assert_eq!(set.as_slice(), &[1, 2, 3]);
}

#[test]
fn test_from_vec_deduplicates() {
    let set = SortedSet::from_vec(vec![2u32, 1, 2, 3, 1]);
    assert_eq!(set.as_slice(), &[1, 2, 3]);
    assert_eq!(set.len(), 3);
}

#[test]
fn test_from_iterator() {
    let set: SortedSet<&str> = ["b", "a", "b"].into_iter().collect();
    assert_eq!(set.as_slice(), &["a", "b"]);
}

// ============================================================================
// Membership tests
// ============================================================================

#[test]
fn test_contains_present_and_absent() {
    let set = SortedSet::from_vec(vec![
        "VK_EXT_debug_utils".to_string(),
        "VK_KHR_surface".to_string(),
        "VK_KHR_swapchain".to_string(),
    ]);

    assert!(set.contains("VK_KHR_swapchain"));
    assert!(set.contains("VK_EXT_debug_utils"));
    assert!(!set.contains("VK_KHR_ray_tracing_pipeline"));
    assert!(!set.contains(""));
}

#[test]
fn test_contains_borrowed_lookup() {
    // SortedSet<String> must answer &str queries without allocating
    let set = SortedSet::from_vec(vec!["alpha".to_string(), "beta".to_string()]);
    assert!(set.contains("alpha"));
    assert!(!set.contains("gamma"));
}

// ============================================================================
// Insert tests
// ============================================================================

#[test]
fn test_insert_keeps_sorted_order() {
    let mut set = SortedSet::new();
    assert!(set.insert(5u32));
    assert!(set.insert(1));
    assert!(set.insert(3));
    assert_eq!(set.as_slice(), &[1, 3, 5]);
}

#[test]
fn test_insert_rejects_duplicate() {
    let mut set = SortedSet::from_vec(vec![1u32, 2]);
    assert!(!set.insert(2));
    assert_eq!(set.len(), 2);
}

#[test]
fn test_iter_is_sorted() {
    let set = SortedSet::from_vec(vec![30u32, 10, 20]);
    let collected: Vec<u32> = set.iter().copied().collect();
    assert_eq!(collected, vec![10, 20, 30]);
}
