//! LRU of undecoded archive buffers.

use bytes::Bytes;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// Default number of raw volumes kept to avoid refetching.
pub const DEFAULT_RAW_CAPACITY: usize = 15;

pub type SharedRawCache = Arc<Mutex<RawCache>>;

/// Raw volume bytes keyed by archive object key.
///
/// Several per-sweep frames of one SAILS volume share a key, so one download
/// serves all of them.
pub struct RawCache {
    entries: LruCache<String, Bytes>,
}

impl RawCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    pub fn shared(capacity: usize) -> SharedRawCache {
        Arc::new(Mutex::new(Self::new(capacity)))
    }

    pub fn get(&mut self, key: &str) -> Option<Bytes> {
        self.entries.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, data: Bytes) {
        let key = key.into();
        log::debug!("Caching raw volume {} ({} bytes)", key, data.len());
        if let Some((evicted, _)) = self.entries.push(key.clone(), data) {
            if evicted != key {
                log::debug!("Evicted raw volume {}", evicted);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Total bytes held.
    pub fn total_bytes(&self) -> usize {
        self.entries.iter().map(|(_, data)| data.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_cache_evicts_lru() {
        let mut cache = RawCache::new(2);
        cache.insert("a", Bytes::from_static(b"aa"));
        cache.insert("b", Bytes::from_static(b"bbb"));
        assert!(cache.get("a").is_some());
        cache.insert("c", Bytes::from_static(b"c"));

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.total_bytes(), 3);
    }

    #[test]
    fn test_raw_cache_overwrite() {
        let mut cache = RawCache::new(DEFAULT_RAW_CAPACITY);
        cache.insert("a", Bytes::from_static(b"old"));
        cache.insert("a", Bytes::from_static(b"new!"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a").as_deref(), Some(&b"new!"[..]));
        cache.clear();
        assert!(cache.is_empty());
    }
}
