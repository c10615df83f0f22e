//! Type definitions for archived NEXRAD volumes.
//!
//! A [`ScanFile`] is the pipeline's handle on one archive object. Volumes
//! carrying supplemental low-level sweeps are expanded into one `ScanFile` per
//! sweep, all sharing the same source key.

use serde::{Deserialize, Serialize};

/// Span assumed between volumes when the next volume's time is unknown.
const DEFAULT_VOLUME_SPAN_MS: i64 = 5 * 60 * 1000;

/// Reference to one archived volume.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanFile {
    /// Object key in the archive (e.g., "2013/05/20/KTLX/KTLX20130520_200356_V06.gz")
    pub key: String,
    /// Four-letter site identifier
    pub site: String,
    /// Scan time in milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    /// Object size in bytes (0 when the listing did not report one)
    pub size: u64,
    /// Position within a volume's supplemental sweeps
    pub sweep_index: Option<u8>,
    /// Number of supplemental sweeps in the source volume
    pub sweep_count: Option<u8>,
}

impl ScanFile {
    pub fn new(key: impl Into<String>, site: impl Into<String>, timestamp_ms: i64, size: u64) -> Self {
        Self {
            key: key.into(),
            site: site.into(),
            timestamp_ms,
            size,
            sweep_index: None,
            sweep_count: None,
        }
    }

    /// File name portion of the object key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    /// Split this volume into `count` timeline entries, one per supplemental sweep.
    ///
    /// Timestamps are spread evenly between this volume and the next one so the
    /// timeline shows the low-level updates in order.
    pub fn expand_sweeps(&self, count: u8, next_timestamp_ms: Option<i64>) -> Vec<ScanFile> {
        if count <= 1 {
            return vec![self.clone()];
        }

        let span = next_timestamp_ms
            .map(|next| next - self.timestamp_ms)
            .filter(|span| *span > 0)
            .unwrap_or(DEFAULT_VOLUME_SPAN_MS);
        let step = span / count as i64;

        (0..count)
            .map(|index| ScanFile {
                timestamp_ms: self.timestamp_ms + step * index as i64,
                sweep_index: Some(index),
                sweep_count: Some(count),
                ..self.clone()
            })
            .collect()
    }
}
