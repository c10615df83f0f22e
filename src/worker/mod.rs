//! Off-thread decode and render.
//!
//! Decoding a volume and rasterizing a sweep take tens to hundreds of
//! milliseconds, so they run on a fixed pool of OS threads and report back
//! through futures that the async scheduler awaits.

mod messages;
mod pool;
mod render_worker;

pub use messages::{
    DecodeRenderJob, ProbeSweepsJob, RenderOutput, WorkerRequest, WorkerResponse,
};
pub use pool::{PoolStats, RenderBackend, WorkerPool};
pub use render_worker::{JobHandler, RenderWorker, DEFAULT_PARSED_CAPACITY};
