//! Request and response types exchanged with render workers.

use crate::error::{ReplayError, Result};
use crate::nexrad::{ElevationEntry, SailsInfo};
use crate::render::{ColorTable, FrameStats, Product, Smoothing};
use bytes::Bytes;
use std::sync::Arc;

/// Decode a volume (or reuse it from the parsed cache) and render one sweep.
#[derive(Debug, Clone)]
pub struct DecodeRenderJob {
    /// Archive key, also the parsed-cache key
    pub volume_key: String,
    pub data: Bytes,
    pub product: Product,
    /// Index into the volume's deduplicated elevation list
    pub elevation_index: usize,
    /// Supplemental sweep within the lowest elevation
    pub sweep_index: Option<u8>,
    pub smoothing: Smoothing,
    pub table: Arc<ColorTable>,
    /// Output edge length in pixels
    pub size: u32,
    pub range_km: f32,
    /// Station coordinates used when the volume carries none
    pub fallback_coords: Option<(f32, f32)>,
}

/// Report the supplemental low-level sweep layout of a volume.
#[derive(Debug, Clone)]
pub struct ProbeSweepsJob {
    pub volume_key: String,
    pub data: Bytes,
    /// Station coordinates used when the volume carries none
    pub fallback_coords: Option<(f32, f32)>,
}

/// Work accepted by a render worker.
#[derive(Debug, Clone)]
pub enum WorkerRequest {
    DecodeRender(DecodeRenderJob),
    ProbeSweeps(ProbeSweepsJob),
}

impl WorkerRequest {
    pub fn volume_key(&self) -> &str {
        match self {
            WorkerRequest::DecodeRender(job) => &job.volume_key,
            WorkerRequest::ProbeSweeps(job) => &job.volume_key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkerRequest::DecodeRender(_) => "decode-render",
            WorkerRequest::ProbeSweeps(_) => "probe-sweeps",
        }
    }
}

/// An encoded frame and the volume metadata needed to place it.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: i64,
    pub site_id: String,
    pub site_lat: f32,
    pub site_lon: f32,
    pub range_km: f32,
    /// Elevation number actually rendered
    pub elevation_number: u8,
    pub elevation_angle: f32,
    pub elevations: Vec<ElevationEntry>,
    pub vcp: u16,
    pub stats: FrameStats,
}

/// Successful worker result.
#[derive(Debug, Clone)]
pub enum WorkerResponse {
    Rendered(Box<RenderOutput>),
    Sweeps(SailsInfo),
}

impl WorkerResponse {
    pub fn into_rendered(self) -> Result<RenderOutput> {
        match self {
            WorkerResponse::Rendered(output) => Ok(*output),
            WorkerResponse::Sweeps(_) => Err(ReplayError::Render(
                "expected a rendered frame, got a sweep probe".into(),
            )),
        }
    }

    pub fn into_sweeps(self) -> Result<SailsInfo> {
        match self {
            WorkerResponse::Sweeps(info) => Ok(info),
            WorkerResponse::Rendered(_) => Err(ReplayError::Render(
                "expected a sweep probe, got a rendered frame".into(),
            )),
        }
    }
}
