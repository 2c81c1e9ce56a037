/// Compact hash of a string identifier.
///
/// Backends deal with large sets of extension and layer names that are
/// compared far more often than they are displayed. Hashing them once
/// into a `u64` keeps lookups cheap and lets collections of names live
/// in a flat, ordered layout (see `SortedSet`).
///
/// The hash is stable for the lifetime of the process only; never
/// persist it to disk.
///
/// # Example
///
/// ```ignore
/// let names: SortedSet<HashedName> = extensions
///     .iter()
///     .map(|ext| HashedName::new(ext))
///     .collect();
/// assert!(names.contains(&HashedName::new("VK_KHR_swapchain")));
/// ```
use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HashedName(u64);

impl HashedName {
    /// Hash a name into its compact form
    pub fn new(name: &str) -> Self {
        let mut hasher = FxHasher::default();
        name.hash(&mut hasher);
        Self(hasher.finish())
    }

    /// Raw hash value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<&str> for HashedName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "hashed_name_tests.rs"]
mod tests;
