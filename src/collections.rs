//! Hash collections used for blob hash sets and diff lookups.
//!
//! With the `gxhash` feature the maps and sets are keyed through
//! `gxhash::GxBuildHasher`, which needs AES-NI/SSE2 (or the ARM equivalents).
//! Without it the std `RandomState` hasher is used, so the crate builds on any
//! target. Always construct through `default()` or the capacity helpers so the
//! hasher choice stays in this module.

/// Hasher builder selected by the `gxhash` feature
#[cfg(feature = "gxhash")]
pub type BuildHasher = gxhash::GxBuildHasher;

/// Hasher builder selected by the `gxhash` feature
#[cfg(not(feature = "gxhash"))]
pub type BuildHasher = std::hash::RandomState;

/// HashMap keyed through [`BuildHasher`]
pub type HashMap<K, V> = std::collections::HashMap<K, V, BuildHasher>;

/// HashSet keyed through [`BuildHasher`]
pub type HashSet<T> = std::collections::HashSet<T, BuildHasher>;

/// Create an empty map with room for `capacity` entries
pub fn map_with_capacity<K, V>(capacity: usize) -> HashMap<K, V> {
    HashMap::with_capacity_and_hasher(capacity, BuildHasher::default())
}

/// Create an empty set with room for `capacity` entries
pub fn set_with_capacity<T>(capacity: usize) -> HashSet<T> {
    HashSet::with_capacity_and_hasher(capacity, BuildHasher::default())
}
