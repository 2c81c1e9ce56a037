use std::borrow::Borrow;

/// Sorted, deduplicated set over a `Vec` with binary-search lookup.
///
/// Backs the enabled extension/layer name lists: built once at
/// instance/device creation, then queried many times. The sorted
/// invariant is maintained by construction, so `contains` is O(log n)
/// and iteration yields names in a stable order for logging.
///
/// # Example
///
/// ```ignore
/// let set = SortedSet::from_vec(vec!["VK_KHR_swapchain", "VK_EXT_debug_utils"]);
/// assert!(set.contains(&"VK_KHR_swapchain"));
/// assert_eq!(set.as_slice(), &["VK_EXT_debug_utils", "VK_KHR_swapchain"]);
/// ```
#[derive(Debug, Clone)]
pub struct SortedSet<T: Ord> {
    items: Vec<T>,
}

impl<T: Ord> SortedSet<T> {
    /// Create an empty set
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Build a set from arbitrary items (sorts and deduplicates)
    pub fn from_vec(mut items: Vec<T>) -> Self {
        items.sort_unstable();
        items.dedup();
        Self { items }
    }

    /// Insert an item, keeping the sorted invariant.
    ///
    /// Returns false if the item was already present.
    pub fn insert(&mut self, item: T) -> bool {
        match self.items.binary_search(&item) {
            Ok(_) => false,
            Err(pos) => {
                self.items.insert(pos, item);
                true
            }
        }
    }

    /// Binary-search membership test
    pub fn contains<Q>(&self, item: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.items
            .binary_search_by(|probe| probe.borrow().cmp(item))
            .is_ok()
    }

    /// Number of items in the set
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the set holds no items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate items in sorted order
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Items as a sorted slice
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

impl<T: Ord> Default for SortedSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord> FromIterator<T> for SortedSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "sorted_set_tests.rs"]
mod tests;
