//! In-memory caches for rendered frames and raw archive buffers.

mod frame_cache;
mod keys;
mod raw_cache;

pub use frame_cache::{
    DisplayImage, EncodedImage, FrameCache, RenderedFrame, SharedFrameCache,
    DEFAULT_FRAME_CAPACITY,
};
pub use keys::{CacheKey, ViewParams};
pub use raw_cache::{RawCache, SharedRawCache, DEFAULT_RAW_CAPACITY};

#[cfg(test)]
pub(crate) use frame_cache::tests as frame_cache_tests;
