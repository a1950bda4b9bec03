//! Bounded least-recently-used cache of CRS transforms.
//!
//! Building a projection involves computing series coefficients, so a
//! transformer keeps the few pairs it has used recently. Eviction is a linear
//! scan, which is fine for the handful of entries this ever holds.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Crs, CrsTransform};

/// Default number of (from, to) pairs kept.
pub const DEFAULT_PROJECTION_CACHE_CAPACITY: usize = 5;

#[derive(Debug)]
pub struct ProjectionCache {
    capacity: usize,
    entries: HashMap<(Crs, Crs), CacheEntry>,
    access_counter: u64,
}

#[derive(Debug)]
struct CacheEntry {
    transform: Arc<CrsTransform>,
    last_access: u64,
}

impl ProjectionCache {
    /// Create a cache holding at most `capacity` pairs (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            access_counter: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up the transform for a pair, marking it as recently used.
    pub fn get(&mut self, from: Crs, to: Crs) -> Option<Arc<CrsTransform>> {
        let entry = self.entries.get_mut(&(from, to))?;
        self.access_counter += 1;
        entry.last_access = self.access_counter;
        Some(Arc::clone(&entry.transform))
    }

    /// Store a transform, evicting the least recently used pair when full.
    pub fn insert(&mut self, transform: Arc<CrsTransform>) {
        let key = (transform.from(), transform.to());
        self.access_counter += 1;

        if let Some(entry) = self.entries.get_mut(&key) {
            entry.transform = transform;
            entry.last_access = self.access_counter;
            return;
        }

        if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }

        self.entries.insert(
            key,
            CacheEntry {
                transform,
                last_access: self.access_counter,
            },
        );
    }

    pub fn contains(&self, from: Crs, to: Crs) -> bool {
        self.entries.contains_key(&(from, to))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| *key);

        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

impl Default for ProjectionCache {
    fn default() -> Self {
        Self::new(DEFAULT_PROJECTION_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(from: u32, to: u32) -> Arc<CrsTransform> {
        Arc::new(CrsTransform::new(Crs(from), Crs(to)).unwrap())
    }

    #[test]
    fn test_get_and_insert() {
        let mut cache = ProjectionCache::new(3);
        cache.insert(pair(4326, 2193));
        cache.insert(pair(2193, 4326));

        assert!(cache.get(Crs(4326), Crs(2193)).is_some());
        assert!(cache.get(Crs(4326), Crs(3857)).is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_eviction_keeps_recent_pairs() {
        let mut cache = ProjectionCache::new(2);
        cache.insert(pair(4326, 2193));
        cache.insert(pair(4326, 3857));

        // Touch the first pair so the second becomes the eviction candidate
        cache.get(Crs(4326), Crs(2193));
        cache.insert(pair(2193, 4326));

        assert!(cache.contains(Crs(4326), Crs(2193)));
        assert!(!cache.contains(Crs(4326), Crs(3857)));
        assert!(cache.contains(Crs(2193), Crs(4326)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_reinsert_does_not_grow() {
        let mut cache = ProjectionCache::new(2);
        cache.insert(pair(4326, 2193));
        cache.insert(pair(4326, 2193));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache = ProjectionCache::new(0);
        assert_eq!(cache.capacity(), 1);
        assert!(cache.is_empty());
    }
}
