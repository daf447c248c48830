//! LRU cache for decoded scenes.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::{CacheStats, GridRegion};

/// LRU cache of decoded rasters keyed by file path, with memory-bounded
/// eviction.
///
/// Monthly scenes are read once per dekad of the month; the cache avoids
/// decoding the same file three times.
pub struct SceneCache {
    cache: LruCache<PathBuf, Arc<GridRegion>>,
    memory_limit: usize,
    current_memory: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl SceneCache {
    /// Create a new scene cache with the given memory limit in bytes.
    pub fn new(memory_limit: usize) -> Self {
        // Estimate max entries assuming ~4MB per scene (1024×1024×4 bytes)
        let scene_size_estimate = 1024 * 1024 * 4;
        let max_entries = (memory_limit / scene_size_estimate).max(16);

        Self {
            cache: LruCache::new(NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN)),
            memory_limit,
            current_memory: 0,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Try to get a scene from the cache.
    pub fn get(&mut self, path: &Path) -> Option<Arc<GridRegion>> {
        if let Some(scene) = self.cache.get(path) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(Arc::clone(scene))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Insert a scene into the cache.
    ///
    /// Least recently used entries are evicted to make room. Scenes larger
    /// than the whole budget are not cached.
    pub fn insert(&mut self, path: PathBuf, scene: Arc<GridRegion>) {
        let scene_size = scene.memory_bytes();

        while self.current_memory + scene_size > self.memory_limit && !self.cache.is_empty() {
            if let Some((_, evicted)) = self.cache.pop_lru() {
                self.current_memory = self.current_memory.saturating_sub(evicted.memory_bytes());
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        if scene_size <= self.memory_limit {
            if let Some((_, replaced)) = self.cache.push(path, scene) {
                self.current_memory = self.current_memory.saturating_sub(replaced.memory_bytes());
            }
            self.current_memory += scene_size;
        }
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.cache.len(),
            memory_bytes: self.current_memory as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Clear all entries from the cache.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.current_memory = 0;
    }

    /// Get the current memory usage in bytes.
    pub fn memory_usage(&self) -> usize {
        self.current_memory
    }

    /// Get the number of entries in the cache.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use series_common::BoundingBox;

    fn scene(values: usize) -> Arc<GridRegion> {
        Arc::new(
            GridRegion::new(vec![1.0; values], values, 1, BoundingBox::new(0.0, 0.0, values as f64, 1.0))
                .unwrap(),
        )
    }

    #[test]
    fn test_cache_insert_and_get() {
        let mut cache = SceneCache::new(1024 * 1024);
        let path = PathBuf::from("/data/a.tif");

        assert!(cache.get(&path).is_none());
        cache.insert(path.clone(), scene(4));
        assert_eq!(cache.get(&path).map(|s| s.len()), Some(4));
    }

    #[test]
    fn test_cache_lru_eviction() {
        // 64 bytes = 16 f32s max
        let mut cache = SceneCache::new(64);

        for i in 0..10 {
            cache.insert(PathBuf::from(format!("/data/{}.tif", i)), scene(4));
        }

        assert!(cache.get(Path::new("/data/0.tif")).is_none());
        assert!(cache.get(Path::new("/data/9.tif")).is_some());
        assert!(cache.memory_usage() <= 64);
        assert!(cache.stats().evictions > 0);
    }

    #[test]
    fn test_reinsert_does_not_double_count() {
        let mut cache = SceneCache::new(1024);
        let path = PathBuf::from("/data/a.tif");
        cache.insert(path.clone(), scene(4));
        cache.insert(path, scene(4));
        assert_eq!(cache.memory_usage(), 16);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_stats() {
        let mut cache = SceneCache::new(1024 * 1024);
        cache.insert(PathBuf::from("/a"), scene(2));

        cache.get(Path::new("/a"));
        cache.get(Path::new("/b"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }
}
