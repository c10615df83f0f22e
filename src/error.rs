//! Error types for the replay pipeline.
//!
//! Almost every failure in the pipeline is resolved locally to "this frame stays
//! unavailable". The only error meant to reach a user is [`ReplayError::NoScans`].

use thiserror::Error;

/// Errors produced anywhere in the fetch, decode, render and cache pipeline.
#[derive(Debug, Clone, Error)]
pub enum ReplayError {
    /// Network transport failure while talking to the archive.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// The archive answered with a non-success status.
    #[error("archive returned HTTP {status} for {key}")]
    Http { status: u16, key: String },

    /// The bucket listing could not be parsed.
    #[error("listing parse failed: {0}")]
    Listing(String),

    /// The archive buffer could not be decoded into a volume.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The volume holds no radials for the requested elevation.
    #[error("no data at elevation number {elevation_number}")]
    NoData { elevation_number: u8 },

    /// Rasterization could not produce a surface.
    #[error("render failed: {0}")]
    Render(String),

    /// PNG encoding failed.
    #[error("image encode failed: {0}")]
    Encode(String),

    /// A color table failed to import.
    #[error("invalid color table: {0}")]
    Palette(String),

    /// The job was superseded or explicitly cancelled.
    #[error("cancelled")]
    Cancelled,

    /// A render worker panicked while running this job.
    #[error("render worker {worker} crashed")]
    WorkerCrashed { worker: usize },

    /// The worker pool is no longer accepting jobs.
    #[error("worker pool shut down")]
    PoolShutdown,

    /// Invalid pipeline configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Local file system failure (CLI and config loading).
    #[error("io error: {0}")]
    Io(String),

    /// A timeline index past the end of the scan list.
    #[error("no scan at timeline index {index}")]
    OutOfRange { index: usize },

    /// No scan of the requested event could be listed or fetched.
    #[error("no scans available for {site}: {detail}")]
    NoScans { site: String, detail: String },
}

impl ReplayError {
    /// True for cancellation, which is expected control flow rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ReplayError::Cancelled)
    }
}

impl From<std::io::Error> for ReplayError {
    fn from(err: std::io::Error) -> Self {
        ReplayError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for ReplayError {
    fn from(err: reqwest::Error) -> Self {
        ReplayError::Fetch(err.to_string())
    }
}

impl From<futures_util::future::Aborted> for ReplayError {
    fn from(_: futures_util::future::Aborted) -> Self {
        ReplayError::Cancelled
    }
}

pub type Result<T> = std::result::Result<T, ReplayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_distinguished() {
        assert!(ReplayError::Cancelled.is_cancelled());
        assert!(!ReplayError::Fetch("reset".into()).is_cancelled());
        assert!(!ReplayError::WorkerCrashed { worker: 1 }.is_cancelled());
    }

    #[test]
    fn test_display_messages() {
        let err = ReplayError::Http {
            status: 404,
            key: "2013/05/20/KTLX/KTLX20130520_200356_V06.gz".into(),
        };
        assert_eq!(
            err.to_string(),
            "archive returned HTTP 404 for 2013/05/20/KTLX/KTLX20130520_200356_V06.gz"
        );
        assert_eq!(
            ReplayError::NoData { elevation_number: 3 }.to_string(),
            "no data at elevation number 3"
        );
    }
}
