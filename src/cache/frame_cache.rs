//! LRU cache of rendered frames.
//!
//! Every frame holds an image resource that must be released explicitly when it
//! leaves the cache. Evictions, overwrites and `clear` all go through
//! [`FrameCache::release_entry`], so each held resource is released exactly once.

use super::keys::CacheKey;
use crate::render::{FrameStats, Product};
use bytes::Bytes;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// Default number of frames kept for scrubbing.
pub const DEFAULT_FRAME_CAPACITY: usize = 250;

/// A displayable image backed by a resource that outlives plain drops.
pub trait DisplayImage: Send + 'static {
    /// Free the backing resource. Called exactly once when the frame leaves the cache.
    fn release(&mut self);

    /// Approximate resident size, for logging.
    fn byte_size(&self) -> usize {
        0
    }
}

/// PNG-encoded frame image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub width: u32,
    pub height: u32,
    png: Bytes,
}

impl EncodedImage {
    pub fn new(width: u32, height: u32, png: impl Into<Bytes>) -> Self {
        Self {
            width,
            height,
            png: png.into(),
        }
    }

    pub fn png(&self) -> &Bytes {
        &self.png
    }

    pub fn is_released(&self) -> bool {
        self.png.is_empty()
    }
}

impl DisplayImage for EncodedImage {
    fn release(&mut self) {
        self.png = Bytes::new();
    }

    fn byte_size(&self) -> usize {
        self.png.len()
    }
}

/// A rendered frame and the metadata needed to place it.
#[derive(Debug, Clone)]
pub struct RenderedFrame<I> {
    pub image: I,
    pub timestamp_ms: i64,
    pub product: Product,
    pub elevation_angle: f32,
    pub site_lat: f32,
    pub site_lon: f32,
    pub range_km: f32,
    pub stats: Option<FrameStats>,
}

/// Frame cache shared between the scheduler and the display layer.
pub type SharedFrameCache<I> = Arc<Mutex<FrameCache<I>>>;

/// Bounded LRU of rendered frames.
pub struct FrameCache<I: DisplayImage> {
    entries: LruCache<CacheKey, RenderedFrame<I>>,
    releases: u64,
    hits: u64,
    misses: u64,
}

impl<I: DisplayImage> FrameCache<I> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            releases: 0,
            hits: 0,
            misses: 0,
        }
    }

    pub fn shared(capacity: usize) -> SharedFrameCache<I> {
        Arc::new(Mutex::new(Self::new(capacity)))
    }

    /// The single exit path for frames leaving the cache.
    fn release_entry(&mut self, key: &CacheKey, mut frame: RenderedFrame<I>) {
        log::debug!(
            "Releasing frame {} ({} bytes)",
            key,
            frame.image.byte_size()
        );
        frame.image.release();
        self.releases += 1;
    }

    /// Look up a frame and mark it most recently used.
    pub fn get(&mut self, key: &CacheKey) -> Option<&RenderedFrame<I>> {
        let frame = self.entries.get(key);
        if frame.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        frame
    }

    /// Look up a frame without touching recency.
    pub fn peek(&self, key: &CacheKey) -> Option<&RenderedFrame<I>> {
        self.entries.peek(key)
    }

    pub fn has(&self, key: &CacheKey) -> bool {
        self.entries.contains(key)
    }

    /// Insert a frame, releasing any frame it replaces or evicts.
    pub fn set(&mut self, key: CacheKey, frame: RenderedFrame<I>) {
        if let Some((old_key, old_frame)) = self.entries.push(key, frame) {
            self.release_entry(&old_key, old_frame);
        }
    }

    /// Remove a single frame.
    pub fn remove(&mut self, key: &CacheKey) -> bool {
        match self.entries.pop_entry(key) {
            Some((key, frame)) => {
                self.release_entry(&key, frame);
                true
            }
            None => false,
        }
    }

    /// Release every held frame.
    pub fn clear(&mut self) {
        let count = self.entries.len();
        while let Some((key, frame)) = self.entries.pop_lru() {
            self.release_entry(&key, frame);
        }
        log::debug!("Cleared frame cache ({} frames)", count);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Number of frames released so far.
    pub fn release_count(&self) -> u64 {
        self.releases
    }

    /// Hit rate of `get` as a percentage (0-100).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        }
    }
}

impl<I: DisplayImage> Drop for FrameCache<I> {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Image double recording how often each id was released.
    #[derive(Debug, Clone)]
    pub struct TrackedImage {
        pub id: u32,
        pub log: Arc<Mutex<HashMap<u32, u32>>>,
    }

    impl DisplayImage for TrackedImage {
        fn release(&mut self) {
            *self.log.lock().unwrap().entry(self.id).or_default() += 1;
        }
    }

    pub fn frame(id: u32, log: &Arc<Mutex<HashMap<u32, u32>>>) -> RenderedFrame<TrackedImage> {
        RenderedFrame {
            image: TrackedImage {
                id,
                log: log.clone(),
            },
            timestamp_ms: id as i64,
            product: Product::Reflectivity,
            elevation_angle: 0.5,
            site_lat: 35.3,
            site_lon: -97.3,
            range_km: 460.0,
            stats: None,
        }
    }

    fn key(n: u32) -> CacheKey {
        CacheKey::new(&format!("scan{}", n), n as i64, Product::Reflectivity, 0, 1, Default::default(), None)
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let log = Arc::new(Mutex::new(HashMap::new()));
        let mut cache = FrameCache::new(3);
        for n in 0..3 {
            cache.set(key(n), frame(n, &log));
        }
        cache.set(key(3), frame(3, &log));

        assert_eq!(cache.len(), 3);
        assert!(!cache.has(&key(0)));
        assert!(cache.has(&key(1)) && cache.has(&key(2)) && cache.has(&key(3)));
        assert_eq!(log.lock().unwrap().get(&0), Some(&1));
    }

    #[test]
    fn test_get_protects_from_eviction() {
        let log = Arc::new(Mutex::new(HashMap::new()));
        let mut cache = FrameCache::new(3);
        for n in 0..3 {
            cache.set(key(n), frame(n, &log));
        }
        assert!(cache.get(&key(0)).is_some());
        cache.set(key(3), frame(3, &log));

        assert!(cache.has(&key(0)));
        assert!(!cache.has(&key(1)));
        assert_eq!(cache.keys()[0], key(3));
    }

    #[test]
    fn test_overwrite_releases_previous_frame() {
        let log = Arc::new(Mutex::new(HashMap::new()));
        let mut cache = FrameCache::new(3);
        cache.set(key(0), frame(10, &log));
        cache.set(key(0), frame(11, &log));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.peek(&key(0)).map(|f| f.image.id), Some(11));
        assert_eq!(log.lock().unwrap().get(&10), Some(&1));
        assert_eq!(log.lock().unwrap().get(&11), None);
    }

    #[test]
    fn test_clear_releases_everything_once() {
        let log = Arc::new(Mutex::new(HashMap::new()));
        let mut cache = FrameCache::new(4);
        for n in 0..6 {
            cache.set(key(n), frame(n, &log));
        }
        cache.clear();
        assert_eq!(cache.len(), 0);
        cache.clear();
        drop(cache);

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 6);
        assert!(log.values().all(|count| *count == 1));
    }

    #[test]
    fn test_drop_releases_held_frames() {
        let log = Arc::new(Mutex::new(HashMap::new()));
        {
            let mut cache = FrameCache::new(2);
            cache.set(key(0), frame(0, &log));
            cache.set(key(1), frame(1, &log));
            assert!(cache.remove(&key(0)));
            assert!(!cache.remove(&key(0)));
        }
        let log = log.lock().unwrap();
        assert_eq!(log.get(&0), Some(&1));
        assert_eq!(log.get(&1), Some(&1));
    }

    #[test]
    fn test_encoded_image_release() {
        let mut image = EncodedImage::new(2, 2, vec![1u8, 2, 3]);
        assert_eq!(image.byte_size(), 3);
        image.release();
        assert!(image.is_released());
    }

    #[test]
    fn test_hit_rate() {
        let log = Arc::new(Mutex::new(HashMap::new()));
        let mut cache = FrameCache::new(2);
        cache.set(key(0), frame(0, &log));
        assert!(cache.get(&key(0)).is_some());
        assert!(cache.get(&key(1)).is_none());
        assert!((cache.hit_rate() - 50.0).abs() < 1e-9);
    }
}
