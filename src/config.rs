//! Pipeline configuration.
//!
//! Settings are read from an optional JSON file. Missing keys take their default
//! values, and an unreadable or malformed file falls back to the defaults entirely.

use crate::error::{ReplayError, Result};
use crate::render::Smoothing;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default public bucket holding the Level-2 archive.
pub const DEFAULT_BUCKET: &str = "unidata-nexrad-level2";

/// Capacities, concurrency limits and rendering defaults for the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Rendered frames kept for scrubbing. Sized to hold a whole event.
    pub frame_cache_capacity: usize,
    /// Undecoded archive buffers kept to avoid refetching.
    pub raw_cache_capacity: usize,
    /// Parsed volumes kept per render worker.
    pub parsed_cache_capacity: usize,
    /// Number of render workers in the pool.
    pub worker_count: usize,
    /// Concurrent window jobs.
    pub max_concurrent: usize,
    /// Concurrent jobs while downloading a whole event.
    pub bulk_concurrency: usize,
    /// Frames prefetched ahead of the playback position.
    pub look_ahead: usize,
    /// Frames prefetched behind the playback position.
    pub look_behind: usize,
    /// Output raster edge length in pixels.
    pub canvas_size: u32,
    /// Radius covered by a rendered frame.
    pub range_km: f32,
    /// Upper bound on frames skipped ahead during fast playback.
    pub frame_skip_cap: usize,
    /// Smoothing used when none is requested explicitly.
    pub smoothing: Smoothing,
    /// Archive bucket name.
    pub bucket: String,
    /// Timeout for a single archive request.
    pub http_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_cache_capacity: 250,
            raw_cache_capacity: 15,
            parsed_cache_capacity: 3,
            worker_count: 2,
            max_concurrent: 2,
            bulk_concurrency: 4,
            look_ahead: 10,
            look_behind: 3,
            canvas_size: 1024,
            range_km: 460.0,
            frame_skip_cap: 8,
            smoothing: Smoothing::None,
            bucket: DEFAULT_BUCKET.to_string(),
            http_timeout_secs: 60,
        }
    }
}

impl PipelineConfig {
    /// Load settings from a JSON file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        let json = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("Failed to read config {}: {}", path.display(), e);
                return Self::default();
            }
        };

        match serde_json::from_str::<Self>(&json) {
            Ok(config) => match config.validate() {
                Ok(()) => {
                    log::info!("Loaded pipeline config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Ignoring config {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Failed to parse config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Write settings as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).map_err(|e| ReplayError::Config(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            ("frame_cache_capacity", self.frame_cache_capacity),
            ("raw_cache_capacity", self.raw_cache_capacity),
            ("parsed_cache_capacity", self.parsed_cache_capacity),
            ("worker_count", self.worker_count),
            ("max_concurrent", self.max_concurrent),
            ("bulk_concurrency", self.bulk_concurrency),
            ("frame_skip_cap", self.frame_skip_cap),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ReplayError::Config(format!("{} must be at least 1", name)));
            }
        }
        if self.canvas_size == 0 {
            return Err(ReplayError::Config("canvas_size must be at least 1".into()));
        }
        if !(self.range_km.is_finite() && self.range_km > 0.0) {
            return Err(ReplayError::Config("range_km must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.frame_cache_capacity, 250);
        assert_eq!(config.raw_cache_capacity, 15);
        assert_eq!(config.parsed_cache_capacity, 3);
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.frame_skip_cap, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "worker_count": 4, "smoothing": "high" }}"#).unwrap();

        let config = PipelineConfig::load(file.path());
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.smoothing, Smoothing::High);
        assert_eq!(config.frame_cache_capacity, 250);
    }

    #[test]
    fn test_invalid_file_falls_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert_eq!(PipelineConfig::load(file.path()), PipelineConfig::default());

        let mut zero = tempfile::NamedTempFile::new().unwrap();
        write!(zero, r#"{{ "worker_count": 0 }}"#).unwrap();
        assert_eq!(PipelineConfig::load(zero.path()), PipelineConfig::default());
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let config = PipelineConfig {
            look_ahead: 6,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(PipelineConfig::load(&path), config);
    }
}
