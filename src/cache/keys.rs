//! Cache key types.
//!
//! A [`CacheKey`] identifies one fully specified renderable frame. It is built
//! from the scan's source key and timestamp plus the [`ViewParams`] the frame
//! was rendered with:
//!
//! `"{scan}|{timestamp}|{product}|e{elevation}|p{palette}|{smoothing}[|s{sweep}]"`
//!
//! Equal inputs always produce equal keys and any differing field produces a
//! different key, so frames rendered with an older palette or another
//! smoothing mode are never served by mistake.

use crate::nexrad::ScanFile;
use crate::render::{Product, Smoothing};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rendering choices shared by every frame of the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewParams {
    pub product: Product,
    /// Index into the volume's deduplicated elevation list
    pub elevation_index: usize,
    pub palette_version: u64,
    pub smoothing: Smoothing,
}

impl Default for ViewParams {
    fn default() -> Self {
        Self {
            product: Product::Reflectivity,
            elevation_index: 0,
            palette_version: 1,
            smoothing: Smoothing::None,
        }
    }
}

/// Deterministic identifier of one rendered frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(
        scan_key: &str,
        timestamp_ms: i64,
        product: Product,
        elevation_index: usize,
        palette_version: u64,
        smoothing: Smoothing,
        sweep_index: Option<u8>,
    ) -> Self {
        let mut key = format!(
            "{}|{}|{}|e{}|p{}|{}",
            scan_key,
            timestamp_ms,
            product.as_str(),
            elevation_index,
            palette_version,
            smoothing.as_str()
        );
        if let Some(sweep) = sweep_index {
            key.push_str(&format!("|s{}", sweep));
        }
        Self(key)
    }

    /// Key for a scan rendered with the given view.
    pub fn for_scan(scan: &ScanFile, view: &ViewParams) -> Self {
        Self::new(
            &scan.key,
            scan.timestamp_ms,
            view.product,
            view.elevation_index,
            view.palette_version,
            view.smoothing,
            scan.sweep_index,
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCAN: &str = "2013/05/20/KTLX/KTLX20130520_200356_V06.gz";

    fn base() -> CacheKey {
        CacheKey::new(SCAN, 1_369_080_236_000, Product::Reflectivity, 0, 3, Smoothing::None, Some(1))
    }

    #[test]
    fn test_cache_key_format() {
        assert_eq!(
            base().as_str(),
            "2013/05/20/KTLX/KTLX20130520_200356_V06.gz|1369080236000|reflectivity|e0|p3|none|s1"
        );
        let no_sweep =
            CacheKey::new(SCAN, 1_369_080_236_000, Product::Reflectivity, 0, 3, Smoothing::None, None);
        assert!(no_sweep.as_str().ends_with("|none"));
    }

    #[test]
    fn test_cache_key_deterministic() {
        assert_eq!(base(), base());
        assert_eq!(base().to_string(), base().to_string());
    }

    #[test]
    fn test_cache_key_differs_per_field() {
        let ts = 1_369_080_236_000;
        let variants = [
            CacheKey::new("other", ts, Product::Reflectivity, 0, 3, Smoothing::None, Some(1)),
            CacheKey::new(SCAN, ts + 1, Product::Reflectivity, 0, 3, Smoothing::None, Some(1)),
            CacheKey::new(SCAN, ts, Product::Velocity, 0, 3, Smoothing::None, Some(1)),
            CacheKey::new(SCAN, ts, Product::Reflectivity, 1, 3, Smoothing::None, Some(1)),
            CacheKey::new(SCAN, ts, Product::Reflectivity, 0, 4, Smoothing::None, Some(1)),
            CacheKey::new(SCAN, ts, Product::Reflectivity, 0, 3, Smoothing::High, Some(1)),
            CacheKey::new(SCAN, ts, Product::Reflectivity, 0, 3, Smoothing::None, Some(2)),
            CacheKey::new(SCAN, ts, Product::Reflectivity, 0, 3, Smoothing::None, None),
        ];
        for variant in &variants {
            assert_ne!(*variant, base());
        }
    }

    #[test]
    fn test_for_scan_uses_sweep_index() {
        let mut scan = ScanFile::new(SCAN, "KTLX", 1_369_080_236_000, 0);
        scan.sweep_index = Some(1);
        let view = ViewParams {
            palette_version: 3,
            ..Default::default()
        };
        assert_eq!(CacheKey::for_scan(&scan, &view), base());
    }
}
