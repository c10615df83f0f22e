#![warn(clippy::all)]

//! NEXRAD Replay - decode, rasterize, cache and prefetch pipeline for
//! replaying archived NEXRAD Level-2 radar over a storm event.
//!
//! Archived volumes are listed and fetched from the public Level-2 bucket,
//! decoded and rendered to PNG frames on a pool of worker threads, kept in an
//! LRU frame cache and prefetched around the playback position. The display
//! layer hands the map the current frame and its Mercator-corrected bounds.

pub mod cache;
pub mod config;
pub mod display;
pub mod error;
pub mod geo;
pub mod nexrad;
pub mod prefetch;
pub mod render;
pub mod worker;

#[cfg(test)]
mod fixtures;

pub use config::PipelineConfig;
pub use error::{ReplayError, Result};
