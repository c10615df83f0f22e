//! Prefetch scheduling around the playback position.
//!
//! The [`PrefetchManager`] keeps a priority window of frames around the current
//! timeline index rendered into the frame cache. Each window update cancels work
//! that fell out of the window, rebuilds the queue in priority order and starts
//! jobs up to the concurrency cap. Every finished job starts the next queued one.
//!
//! A separate bulk mode renders the whole timeline in spiral order from a start
//! index with its own concurrency limit. While it runs, window updates never
//! preempt in-flight work.
//!
//! Window, bulk and single-frame requests all claim a key before rendering it.
//! A request for a key that is already claimed waits for that render instead of
//! starting its own, so each frame is rendered and announced once.

use super::bulk::{spiral_order, BulkSummary};
use super::window::compute_window;
use crate::cache::{
    CacheKey, EncodedImage, FrameCache, RawCache, RenderedFrame, SharedFrameCache,
    SharedRawCache, ViewParams,
};
use crate::config::PipelineConfig;
use crate::error::{ReplayError, Result};
use crate::nexrad::{ArchiveSource, ScanFile};
use nexrad_model::meta::registry;
use crate::render::{ColorTable, PaletteRegistry, Product, Smoothing};
use crate::worker::{DecodeRenderJob, ProbeSweepsJob, RenderBackend, WorkerRequest};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::future::{AbortHandle, AbortRegistration, Abortable, Aborted};
use futures_util::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, Notify};
use web_time::Instant;

/// Frame-ready notifications buffered per subscriber.
const READY_CHANNEL_CAPACITY: usize = 256;

struct QueuedJob {
    key: CacheKey,
    priority: u32,
    scan: ScanFile,
    view: ViewParams,
    table: Arc<ColorTable>,
    abort: AbortHandle,
    registration: AbortRegistration,
}

struct InFlight {
    id: u64,
    abort: AbortHandle,
}

struct SchedulerState {
    scans: Vec<ScanFile>,
    product: Product,
    elevation_index: usize,
    smoothing: Smoothing,
    palettes: PaletteRegistry,
    current: usize,
    queue: Vec<QueuedJob>,
    in_flight: HashMap<CacheKey, InFlight>,
    /// Keys being rendered by any path, woken when the render ends.
    downloading: HashMap<CacheKey, Arc<Notify>>,
    bulk: Option<(u64, AbortHandle)>,
    next_id: u64,
}

impl SchedulerState {
    fn view(&self) -> ViewParams {
        ViewParams {
            product: self.product,
            elevation_index: self.elevation_index,
            palette_version: self.palettes.version(),
            smoothing: self.smoothing,
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn abort_queued(&mut self) {
        for job in self.queue.drain(..) {
            job.abort.abort();
        }
    }
}

struct Shared {
    config: PipelineConfig,
    source: Arc<dyn ArchiveSource>,
    backend: Arc<dyn RenderBackend>,
    frames: SharedFrameCache<EncodedImage>,
    raw: SharedRawCache,
    ready: broadcast::Sender<CacheKey>,
    state: Mutex<SchedulerState>,
}

/// Exclusive right to render one key. Dropping it wakes waiting requests.
struct DownloadClaim {
    shared: Arc<Shared>,
    key: CacheKey,
}

impl Drop for DownloadClaim {
    fn drop(&mut self) {
        let notify = self.shared.lock_state().downloading.remove(&self.key);
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
    }
}

/// Registry coordinates of a listed site.
fn site_coords(site: &str) -> Option<(f32, f32)> {
    registry::site_by_id(site).map(|entry| (entry.latitude, entry.longitude))
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_frames(&self) -> MutexGuard<'_, FrameCache<EncodedImage>> {
        self.frames.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_raw(&self) -> MutexGuard<'_, RawCache> {
        self.raw.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Raw volume bytes from the raw cache or the archive.
    async fn fetch_raw(&self, key: &str) -> Result<Bytes> {
        let cached = self.lock_raw().get(key);
        if let Some(data) = cached {
            return Ok(data);
        }

        let start = Instant::now();
        let data = self.source.fetch(key).await?;
        log::debug!(
            "Downloaded {} ({} bytes) in {:.0}ms",
            key,
            data.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        self.lock_raw().insert(key, data.clone());
        Ok(data)
    }

    /// Fetch, render and cache one frame, then announce it.
    async fn render_frame(
        &self,
        scan: ScanFile,
        view: ViewParams,
        table: Arc<ColorTable>,
    ) -> Result<CacheKey> {
        let key = CacheKey::for_scan(&scan, &view);
        let data = self.fetch_raw(&scan.key).await?;

        let request = WorkerRequest::DecodeRender(DecodeRenderJob {
            volume_key: scan.key.clone(),
            data,
            product: view.product,
            elevation_index: view.elevation_index,
            sweep_index: scan.sweep_index,
            smoothing: view.smoothing,
            table,
            size: self.config.canvas_size,
            range_km: self.config.range_km,
            fallback_coords: site_coords(&scan.site),
        });
        let output = self.backend.submit(request).await?.into_rendered()?;

        let frame = RenderedFrame {
            image: EncodedImage::new(output.width, output.height, output.png),
            timestamp_ms: scan.timestamp_ms,
            product: view.product,
            elevation_angle: output.elevation_angle,
            site_lat: output.site_lat,
            site_lon: output.site_lon,
            range_km: output.range_km,
            stats: Some(output.stats),
        };
        self.lock_frames().set(key.clone(), frame);
        match self.ready.send(key.clone()) {
            Ok(receivers) => log::trace!("Announced {} to {} subscribers", key, receivers),
            Err(_) => log::debug!("Frame {} cached with no subscribers", key),
        }
        Ok(key)
    }

    /// Render a frame unless it is cached or already being rendered.
    ///
    /// When another request holds the key, waits for it to finish and then
    /// re-checks the cache, rendering only if that attempt left nothing behind.
    async fn render_once(
        self: &Arc<Self>,
        scan: ScanFile,
        view: ViewParams,
        table: Arc<ColorTable>,
    ) -> Result<CacheKey> {
        let key = CacheKey::for_scan(&scan, &view);
        let _claim = loop {
            let pending = {
                let mut state = self.lock_state();
                if self.lock_frames().has(&key) {
                    return Ok(key);
                }
                match state.downloading.get(&key) {
                    Some(notify) => notify.clone(),
                    None => {
                        state
                            .downloading
                            .insert(key.clone(), Arc::new(Notify::new()));
                        break DownloadClaim {
                            shared: self.clone(),
                            key: key.clone(),
                        };
                    }
                }
            };

            log::trace!("Waiting on in-progress render of {}", key);
            let finished = pending.notified();
            tokio::pin!(finished);
            finished.as_mut().enable();
            let still_pending = self
                .lock_state()
                .downloading
                .get(&key)
                .is_some_and(|notify| Arc::ptr_eq(notify, &pending));
            if still_pending {
                finished.await;
            }
        };

        self.render_frame(scan, view, table).await
    }

    /// Start queued jobs until the concurrency cap is reached.
    fn drain(self: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!("Prefetch drain requested outside a tokio runtime");
            return;
        };

        let mut state = self.lock_state();
        while state.in_flight.len() < self.config.max_concurrent && !state.queue.is_empty() {
            let QueuedJob {
                key,
                scan,
                view,
                table,
                abort,
                registration,
                ..
            } = state.queue.remove(0);
            let id = state.next_id();
            state.in_flight.insert(key.clone(), InFlight { id, abort });

            let shared = self.clone();
            runtime.spawn(async move {
                let outcome =
                    Abortable::new(shared.render_once(scan, view, table), registration).await;
                match outcome {
                    Ok(Ok(_)) => log::debug!("Prefetched {}", key),
                    Ok(Err(e)) if e.is_cancelled() => log::debug!("Prefetch of {} cancelled", key),
                    Ok(Err(e)) => log::warn!("Prefetch of {} failed: {}", key, e),
                    Err(Aborted) => log::debug!("Prefetch of {} aborted", key),
                }
                shared.finish(&key, id);
            });
        }
    }

    fn finish(self: &Arc<Self>, key: &CacheKey, id: u64) {
        {
            let mut state = self.lock_state();
            if state.in_flight.get(key).map(|job| job.id) == Some(id) {
                state.in_flight.remove(key);
            }
        }
        self.drain();
    }
}

/// Window and bulk prefetcher feeding the frame cache.
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct PrefetchManager {
    shared: Arc<Shared>,
}

impl PrefetchManager {
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn ArchiveSource>,
        backend: Arc<dyn RenderBackend>,
        frames: SharedFrameCache<EncodedImage>,
        raw: SharedRawCache,
    ) -> Self {
        let (ready, _) = broadcast::channel(READY_CHANNEL_CAPACITY);
        let state = SchedulerState {
            scans: Vec::new(),
            product: Product::Reflectivity,
            elevation_index: 0,
            smoothing: config.smoothing,
            palettes: PaletteRegistry::new(),
            current: 0,
            queue: Vec::new(),
            in_flight: HashMap::new(),
            downloading: HashMap::new(),
            bulk: None,
            next_id: 0,
        };
        Self {
            shared: Arc::new(Shared {
                config,
                source,
                backend,
                frames,
                raw,
                ready,
                state: Mutex::new(state),
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    pub fn frame_cache(&self) -> &SharedFrameCache<EncodedImage> {
        &self.shared.frames
    }

    pub fn scans(&self) -> Vec<ScanFile> {
        self.shared.lock_state().scans.clone()
    }

    /// Replace the timeline, cancelling all outstanding work and dropping the
    /// frames and raw buffers of the previous one.
    pub fn set_scans(&self, scans: Vec<ScanFile>) {
        self.cancel_all();
        self.clear_caches();
        self.install_scans(scans);
    }

    fn install_scans(&self, scans: Vec<ScanFile>) {
        let mut state = self.shared.lock_state();
        state.current = state.current.min(scans.len().saturating_sub(1));
        state.scans = scans;
    }

    fn clear_caches(&self) {
        self.shared.lock_frames().clear();
        self.shared.lock_raw().clear();
        log::debug!("Cleared frame and raw caches");
    }

    pub fn view(&self) -> ViewParams {
        self.shared.lock_state().view()
    }

    /// Change what frames are rendered. Call [`Self::update_window`] afterwards.
    pub fn set_view(&self, product: Product, elevation_index: usize, smoothing: Smoothing) {
        let mut state = self.shared.lock_state();
        state.product = product;
        state.elevation_index = elevation_index;
        state.smoothing = smoothing;
    }

    /// Replace a product's color table. Returns the new palette version.
    pub fn set_color_table(&self, product: Product, table: ColorTable) -> u64 {
        self.shared.lock_state().palettes.set_table(product, table)
    }

    /// Import a color table in the text palette format.
    pub fn import_color_table(&self, product: Product, text: &str) -> Result<u64> {
        self.shared.lock_state().palettes.import(product, text)
    }

    pub fn reset_color_table(&self, product: Product) -> u64 {
        self.shared.lock_state().palettes.reset(product)
    }

    /// Cache key of a timeline index under the current view.
    pub fn cache_key(&self, index: usize) -> Option<CacheKey> {
        let state = self.shared.lock_state();
        let view = state.view();
        state.scans.get(index).map(|scan| CacheKey::for_scan(scan, &view))
    }

    /// Recompute the prefetch window around `current` and start work.
    pub fn update_window(&self, current: usize) {
        let config = &self.shared.config;
        {
            let mut state = self.shared.lock_state();
            state.current = current;
            let view = state.view();
            let table = state.palettes.table(view.product);

            let window: Vec<(CacheKey, usize, u32)> =
                compute_window(current, state.scans.len(), config.look_ahead, config.look_behind)
                    .into_iter()
                    .map(|slot| {
                        let key = CacheKey::for_scan(&state.scans[slot.index], &view);
                        (key, slot.index, slot.priority)
                    })
                    .collect();
            let priorities: HashMap<&CacheKey, u32> =
                window.iter().map(|(key, _, priority)| (key, *priority)).collect();

            if state.bulk.is_none() {
                let stale: Vec<CacheKey> = state
                    .in_flight
                    .keys()
                    .filter(|key| !priorities.contains_key(key))
                    .cloned()
                    .collect();
                for key in stale {
                    if let Some(job) = state.in_flight.remove(&key) {
                        job.abort.abort();
                        log::debug!("Cancelled out-of-window job {}", key);
                    }
                }
            }

            let mut queue = Vec::with_capacity(window.len());
            for mut job in std::mem::take(&mut state.queue) {
                match priorities.get(&job.key) {
                    Some(priority) => {
                        job.priority = *priority;
                        queue.push(job);
                    }
                    None => job.abort.abort(),
                }
            }

            let queued: HashSet<CacheKey> = queue.iter().map(|job| job.key.clone()).collect();
            {
                let frames = self.shared.lock_frames();
                for (key, index, priority) in &window {
                    if frames.has(key) || state.in_flight.contains_key(key) || queued.contains(key) {
                        continue;
                    }
                    let (abort, registration) = AbortHandle::new_pair();
                    queue.push(QueuedJob {
                        key: key.clone(),
                        priority: *priority,
                        scan: state.scans[*index].clone(),
                        view,
                        table: table.clone(),
                        abort,
                        registration,
                    });
                }
            }

            queue.sort_by_key(|job| job.priority);
            log::debug!(
                "Window at {}: {} queued, {} in flight",
                current,
                queue.len(),
                state.in_flight.len()
            );
            state.queue = queue;
        }
        self.shared.drain();
    }

    /// Render one frame now unless it is already cached.
    pub async fn request_frame(&self, index: usize) -> Result<CacheKey> {
        let (scan, view, table) = {
            let state = self.shared.lock_state();
            let scan = state
                .scans
                .get(index)
                .cloned()
                .ok_or(ReplayError::OutOfRange { index })?;
            let view = state.view();
            (scan, view, state.palettes.table(view.product))
        };

        let key = CacheKey::for_scan(&scan, &view);
        let cached = self.shared.lock_frames().get(&key).is_some();
        if cached {
            log::trace!("Frame {} already cached", key);
            return Ok(key);
        }
        self.shared.render_once(scan, view, table).await
    }

    /// Render every frame of the timeline, nearest to `start` first.
    ///
    /// Frames already cached are counted before any new work and reported in one
    /// progress call. `on_progress(completed, total)` then runs after each
    /// finished frame, failed ones included. A later call or
    /// [`Self::cancel_bulk`] aborts the run with [`ReplayError::Cancelled`].
    pub async fn download_all<F>(&self, start: usize, mut on_progress: F) -> Result<BulkSummary>
    where
        F: FnMut(usize, usize) + Send,
    {
        self.cancel_bulk();
        let (abort, registration) = AbortHandle::new_pair();

        let (bulk_id, jobs, view, table) = {
            let mut state = self.shared.lock_state();
            let id = state.next_id();
            state.bulk = Some((id, abort));
            let view = state.view();
            let jobs: Vec<(ScanFile, CacheKey)> = spiral_order(state.scans.len(), start)
                .into_iter()
                .map(|index| {
                    let scan = state.scans[index].clone();
                    let key = CacheKey::for_scan(&scan, &view);
                    (scan, key)
                })
                .collect();
            (id, jobs, view, state.palettes.table(view.product))
        };

        let total = jobs.len();
        let pending: Vec<ScanFile> = {
            let frames = self.shared.lock_frames();
            jobs.into_iter()
                .filter(|(_, key)| !frames.has(key))
                .map(|(scan, _)| scan)
                .collect()
        };
        let mut summary = BulkSummary {
            total,
            cached: total - pending.len(),
            ..Default::default()
        };
        log::info!(
            "Bulk download of {} frames from index {} ({} cached)",
            total,
            start,
            summary.cached
        );
        if summary.cached > 0 {
            on_progress(summary.cached, total);
        }

        let concurrency = self.shared.config.bulk_concurrency;
        let run = async {
            let mut results = stream::iter(pending)
                .map(|scan| {
                    let shared = self.shared.clone();
                    let table = table.clone();
                    async move { shared.render_once(scan, view, table).await }
                })
                .buffer_unordered(concurrency);

            while let Some(result) = results.next().await {
                match result {
                    Ok(_) => summary.rendered += 1,
                    Err(e) => {
                        if e.is_cancelled() {
                            log::debug!("Bulk frame cancelled");
                        } else {
                            log::warn!("Bulk frame failed: {}", e);
                        }
                        summary.failed += 1;
                    }
                }
                on_progress(summary.completed(), total);
            }
        };
        let outcome = Abortable::new(run, registration).await;

        {
            let mut state = self.shared.lock_state();
            if matches!(state.bulk, Some((id, _)) if id == bulk_id) {
                state.bulk = None;
            }
        }

        match outcome {
            Ok(()) => {
                log::info!(
                    "Bulk download finished: {} rendered, {} cached, {} failed",
                    summary.rendered,
                    summary.cached,
                    summary.failed
                );
                Ok(summary)
            }
            Err(Aborted) => {
                log::debug!("Bulk download cancelled at {}/{}", summary.completed(), total);
                Err(ReplayError::Cancelled)
            }
        }
    }

    pub fn is_bulk_active(&self) -> bool {
        self.shared.lock_state().bulk.is_some()
    }

    /// Abort the running bulk download, if any.
    pub fn cancel_bulk(&self) {
        if let Some((_, abort)) = self.shared.lock_state().bulk.take() {
            abort.abort();
        }
    }

    /// Abort every queued, in-flight and bulk job and reject pending worker jobs.
    pub fn cancel_all(&self) {
        {
            let mut state = self.shared.lock_state();
            state.abort_queued();
            for (_, job) in state.in_flight.drain() {
                job.abort.abort();
            }
            if let Some((_, abort)) = state.bulk.take() {
                abort.abort();
            }
        }
        self.shared.backend.cancel_all();
    }

    /// Notifications carrying each newly cached frame key.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheKey> {
        self.shared.ready.subscribe()
    }

    pub fn in_flight_keys(&self) -> Vec<CacheKey> {
        self.shared.lock_state().in_flight.keys().cloned().collect()
    }

    /// Queued keys in dispatch order.
    pub fn queued_keys(&self) -> Vec<CacheKey> {
        self.shared
            .lock_state()
            .queue
            .iter()
            .map(|job| job.key.clone())
            .collect()
    }

    /// List an event's volumes and make them the timeline.
    ///
    /// Every UTC date touched by `start..=end` is listed. When the first volume
    /// carries supplemental low-level sweeps, every volume is expanded into one
    /// timeline entry per sweep. Fails with [`ReplayError::NoScans`] only when no
    /// volume at all is available.
    pub async fn load_event(
        &self,
        site: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ScanFile>> {
        let site = site.trim().to_uppercase();
        let (start_ms, end_ms) = (start.timestamp_millis(), end.timestamp_millis());

        let mut listed = Vec::new();
        let mut last_error = None;
        let mut date = start.date_naive();
        while date <= end.date_naive() {
            match self.shared.source.list(&site, date).await {
                Ok(scans) => listed.extend(scans),
                Err(e) => {
                    log::warn!("Listing {} for {} failed: {}", site, date, e);
                    last_error = Some(e);
                }
            }
            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }

        let mut scans: Vec<ScanFile> = listed
            .into_iter()
            .filter(|scan| scan.timestamp_ms >= start_ms && scan.timestamp_ms <= end_ms)
            .collect();
        scans.sort_by_key(|scan| scan.timestamp_ms);
        scans.dedup_by(|a, b| a.key == b.key);

        if scans.is_empty() {
            let detail = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| format!("no volumes between {} and {}", start, end));
            return Err(ReplayError::NoScans { site, detail });
        }

        self.cancel_all();
        self.clear_caches();
        let sweep_count = self.probe_sweeps(&scans[0]).await;
        let timeline: Vec<ScanFile> = if sweep_count > 1 {
            scans
                .iter()
                .enumerate()
                .flat_map(|(i, scan)| {
                    let next = scans.get(i + 1).map(|s| s.timestamp_ms);
                    scan.expand_sweeps(sweep_count, next)
                })
                .collect()
        } else {
            scans
        };

        log::info!(
            "Loaded event for {}: {} timeline frames ({} sweeps per volume)",
            site,
            timeline.len(),
            sweep_count
        );
        self.install_scans(timeline.clone());
        Ok(timeline)
    }

    /// Supplemental sweep count of a volume; 1 when it cannot be determined.
    async fn probe_sweeps(&self, scan: &ScanFile) -> u8 {
        let result = async {
            let data = self.shared.fetch_raw(&scan.key).await?;
            self.shared
                .backend
                .submit(WorkerRequest::ProbeSweeps(ProbeSweepsJob {
                    volume_key: scan.key.clone(),
                    data,
                    fallback_coords: site_coords(&scan.site),
                }))
                .await?
                .into_sweeps()
        }
        .await;

        match result {
            Ok(info) => u8::try_from(info.sweep_count).unwrap_or(u8::MAX).max(1),
            Err(e) => {
                log::warn!("Sweep probe of {} failed: {}", scan.key, e);
                1
            }
        }
    }
}
