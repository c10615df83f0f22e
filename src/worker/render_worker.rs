//! Render worker: decode, rasterize and encode one frame per request.
//!
//! A worker owns a small LRU of parsed volumes, so consecutive sweeps, products
//! and elevations of the same volume decode only once, and a single output
//! surface that is reallocated only when the requested size changes.

use super::messages::{DecodeRenderJob, ProbeSweepsJob, RenderOutput, WorkerRequest, WorkerResponse};
use crate::error::{ReplayError, Result};
use crate::nexrad::{parse_volume, ParsedVolume, SailsInfo};
use crate::render::{rasterize, FrameStats, PolarSweep, Product};
use lru::LruCache;
use nexrad_model::data::Sweep;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tiny_skia::Pixmap;
use web_time::Instant;

/// Default number of parsed volumes kept per worker.
pub const DEFAULT_PARSED_CAPACITY: usize = 3;

/// Anything that can execute worker requests on a pool thread.
pub trait JobHandler: Send + 'static {
    fn handle(&mut self, request: WorkerRequest) -> Result<WorkerResponse>;
}

/// Stateful decoder and rasterizer owned by one pool thread.
pub struct RenderWorker {
    parsed: LruCache<String, Arc<ParsedVolume>>,
    pixmap: Option<Pixmap>,
    surface_allocations: usize,
}

impl RenderWorker {
    pub fn new(parsed_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(parsed_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            parsed: LruCache::new(capacity),
            pixmap: None,
            surface_allocations: 0,
        }
    }

    /// Number of times the output surface was (re)allocated.
    pub fn surface_allocations(&self) -> usize {
        self.surface_allocations
    }

    #[cfg(test)]
    pub(crate) fn insert_parsed(&mut self, key: &str, volume: ParsedVolume) {
        self.parsed.put(key.to_string(), Arc::new(volume));
    }

    fn volume(
        &mut self,
        key: &str,
        data: &[u8],
        fallback_coords: Option<(f32, f32)>,
    ) -> Result<Arc<ParsedVolume>> {
        if let Some(volume) = self.parsed.get(key) {
            return Ok(volume.clone());
        }

        let volume = parse_volume(data, fallback_coords)
            .map(Arc::new)
            .ok_or_else(|| ReplayError::Decode(format!("could not decode {}", key)))?;
        self.parsed.put(key.to_string(), volume.clone());
        Ok(volume)
    }

    fn surface(&mut self, size: u32) -> Result<&mut Pixmap> {
        let reusable = matches!(&self.pixmap, Some(p) if p.width() == size && p.height() == size);
        if !reusable {
            let pixmap = Pixmap::new(size, size)
                .ok_or_else(|| ReplayError::Render(format!("invalid canvas size {}", size)))?;
            self.pixmap = Some(pixmap);
            self.surface_allocations += 1;
        }
        self.pixmap
            .as_mut()
            .ok_or_else(|| ReplayError::Render("output surface missing".into()))
    }

    fn decode_render(&mut self, job: DecodeRenderJob) -> Result<RenderOutput> {
        let start = Instant::now();
        let volume = self.volume(&job.volume_key, &job.data, job.fallback_coords)?;

        let requested = volume
            .elevation_number_for(job.elevation_index, job.sweep_index)
            .ok_or(ReplayError::NoData {
                elevation_number: u8::try_from(job.elevation_index + 1).unwrap_or(u8::MAX),
            })?;

        let (elevation_number, polar, sweep) = match extract(&volume, requested, job.product) {
            Some(found) => found,
            None if requested < volume.max_elevation_number() => {
                let next = requested + 1;
                log::debug!(
                    "No {} at elevation {} of {}, retrying at {}",
                    job.product,
                    requested,
                    job.volume_key,
                    next
                );
                extract(&volume, next, job.product).ok_or(ReplayError::NoData {
                    elevation_number: requested,
                })?
            }
            None => {
                return Err(ReplayError::NoData {
                    elevation_number: requested,
                })
            }
        };

        let pixmap = self.surface(job.size)?;
        rasterize(pixmap, &polar, &job.table, job.range_km, job.smoothing)?;
        let png = pixmap
            .encode_png()
            .map_err(|e| ReplayError::Encode(e.to_string()))?;
        let (width, height) = (pixmap.width(), pixmap.height());

        let mut stats = FrameStats::from_sweep(sweep, volume.vcp, polar.elevation_angle);
        stats.render_ms = start.elapsed().as_secs_f64() * 1000.0;

        log::debug!(
            "Rendered {} {} elevation {} ({}, {} radials) in {:.1}ms",
            job.volume_key,
            job.product,
            elevation_number,
            job.smoothing,
            polar.radials.len(),
            stats.render_ms
        );

        Ok(RenderOutput {
            png,
            width,
            height,
            timestamp_ms: volume.timestamp_ms,
            site_id: volume.site_id.clone(),
            site_lat: volume.site_lat,
            site_lon: volume.site_lon,
            range_km: job.range_km,
            elevation_number,
            elevation_angle: polar.elevation_angle,
            elevations: volume.elevations.clone(),
            vcp: volume.vcp,
            stats,
        })
    }

    fn probe(&mut self, job: ProbeSweepsJob) -> Result<SailsInfo> {
        let volume = self.volume(&job.volume_key, &job.data, job.fallback_coords)?;
        Ok(volume.sails.clone())
    }
}

impl JobHandler for RenderWorker {
    fn handle(&mut self, request: WorkerRequest) -> Result<WorkerResponse> {
        match request {
            WorkerRequest::DecodeRender(job) => self
                .decode_render(job)
                .map(|output| WorkerResponse::Rendered(Box::new(output))),
            WorkerRequest::ProbeSweeps(job) => self.probe(job).map(WorkerResponse::Sweeps),
        }
    }
}

/// The sweep and product view at an elevation number, if it has data.
fn extract(
    volume: &ParsedVolume,
    elevation_number: u8,
    product: Product,
) -> Option<(u8, PolarSweep, &Sweep)> {
    let sweep = volume.sweep_by_number(elevation_number)?;
    let polar = PolarSweep::from_sweep(sweep, product)?;
    Some((elevation_number, polar, sweep))
}
