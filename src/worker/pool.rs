//! Fixed pool of render worker threads.
//!
//! Jobs wait in a FIFO queue and are picked up by the next idle worker. Each
//! submission resolves through a oneshot reply. [`WorkerPool::cancel_all`]
//! rejects every queued and in-flight job and advances the pool epoch; results
//! that arrive afterwards for a rejected job are discarded. Jobs whose caller
//! dropped the reply future are skipped when dequeued. A panicking job is
//! rejected on its own while its thread keeps serving with a fresh handler.

use super::messages::{WorkerRequest, WorkerResponse};
use super::render_worker::{JobHandler, RenderWorker};
use crate::error::{ReplayError, Result};
use async_trait::async_trait;
use futures_channel::oneshot;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

type Reply = oneshot::Sender<Result<WorkerResponse>>;

/// Something that runs worker requests asynchronously.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    async fn submit(&self, request: WorkerRequest) -> Result<WorkerResponse>;

    /// Reject every pending and running job.
    fn cancel_all(&self);
}

struct Job {
    id: u64,
    epoch: u64,
    request: WorkerRequest,
    reply: Reply,
}

#[derive(Default)]
struct Slot {
    job_id: Option<u64>,
    epoch: u64,
    reply: Option<Reply>,
}

#[derive(Default)]
struct PoolState {
    queue: VecDeque<Job>,
    slots: Vec<Slot>,
    epoch: u64,
    next_job_id: u64,
    completed: u64,
    cancelled: u64,
    crashed: u64,
    stale: u64,
    shutdown: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    ready: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub workers: usize,
    pub busy: usize,
    pub queued: usize,
    pub epoch: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub crashed: u64,
    /// Results discarded because their job had been cancelled
    pub stale: u64,
}

/// Render workers on dedicated OS threads.
pub struct WorkerPool {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `size` render workers, each with its own parsed-volume cache.
    pub fn new(size: usize, parsed_capacity: usize) -> Self {
        Self::with_handlers(size, move |_| RenderWorker::new(parsed_capacity))
    }

    /// Start `size` workers running handlers built by `factory`.
    ///
    /// The factory is also used to rebuild a worker's handler after a panic.
    pub fn with_handlers<H, F>(size: usize, factory: F) -> Self
    where
        H: JobHandler,
        F: Fn(usize) -> H + Send + Sync + 'static,
    {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                slots: (0..size).map(|_| Slot::default()).collect(),
                ..Default::default()
            }),
            ready: Condvar::new(),
        });
        let factory = Arc::new(factory);

        let threads = (0..size)
            .filter_map(|index| {
                let shared = shared.clone();
                let factory = factory.clone();
                std::thread::Builder::new()
                    .name(format!("render-worker-{}", index))
                    .spawn(move || run_worker(index, shared, factory))
                    .map_err(|e| log::warn!("Failed to spawn render worker {}: {}", index, e))
                    .ok()
            })
            .collect::<Vec<_>>();

        log::info!("Started worker pool with {} workers", threads.len());
        Self { shared, threads }
    }

    /// Queue a request. The returned future resolves with the worker's result,
    /// or `Cancelled` if the job is rejected by [`WorkerPool::cancel_all`].
    pub fn submit(&self, request: WorkerRequest) -> impl Future<Output = Result<WorkerResponse>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.shared.lock();
            if state.shutdown || self.threads.is_empty() {
                let _ = tx.send(Err(ReplayError::PoolShutdown));
            } else {
                let id = state.next_job_id;
                state.next_job_id += 1;
                log::trace!("Queued {} job {} for {}", request.kind(), id, request.volume_key());
                let epoch = state.epoch;
                state.queue.push_back(Job {
                    id,
                    epoch,
                    request,
                    reply: tx,
                });
                self.shared.ready.notify_one();
            }
        }

        async move { rx.await.unwrap_or(Err(ReplayError::PoolShutdown)) }
    }

    /// Reject every queued and in-flight job and advance the epoch.
    pub fn cancel_all(&self) {
        let mut state = self.shared.lock();
        state.epoch += 1;

        let mut rejected = 0;
        while let Some(job) = state.queue.pop_front() {
            let _ = job.reply.send(Err(ReplayError::Cancelled));
            rejected += 1;
        }
        for slot in state.slots.iter_mut() {
            if let Some(reply) = slot.reply.take() {
                let _ = reply.send(Err(ReplayError::Cancelled));
                rejected += 1;
            }
        }
        state.cancelled += rejected;
        log::debug!("Cancelled {} render jobs (epoch {})", rejected, state.epoch);
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        PoolStats {
            workers: state.slots.len(),
            busy: state.slots.iter().filter(|s| s.job_id.is_some()).count(),
            queued: state.queue.len(),
            epoch: state.epoch,
            completed: state.completed,
            cancelled: state.cancelled,
            crashed: state.crashed,
            stale: state.stale,
        }
    }

    /// Stop accepting work, reject queued jobs and join the worker threads.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            while let Some(job) = state.queue.pop_front() {
                let _ = job.reply.send(Err(ReplayError::PoolShutdown));
            }
        }
        self.shared.ready.notify_all();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        log::debug!("Worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl RenderBackend for WorkerPool {
    async fn submit(&self, request: WorkerRequest) -> Result<WorkerResponse> {
        WorkerPool::submit(self, request).await
    }

    fn cancel_all(&self) {
        WorkerPool::cancel_all(self)
    }
}

fn run_worker<H, F>(index: usize, shared: Arc<Shared>, factory: Arc<F>)
where
    H: JobHandler,
    F: Fn(usize) -> H,
{
    let mut handler = factory(index);

    loop {
        let (id, epoch, request) = {
            let mut state = shared.lock();
            loop {
                if state.shutdown {
                    return;
                }
                if let Some(job) = state.queue.pop_front() {
                    if job.reply.is_canceled() {
                        log::trace!(
                            "Skipping abandoned job {} for {}",
                            job.id,
                            job.request.volume_key()
                        );
                        state.stale += 1;
                        continue;
                    }
                    let slot = &mut state.slots[index];
                    slot.job_id = Some(job.id);
                    slot.epoch = job.epoch;
                    slot.reply = Some(job.reply);
                    break (job.id, job.epoch, job.request);
                }
                state = shared.ready.wait(state).unwrap_or_else(|e| e.into_inner());
            }
        };

        let result = match catch_unwind(AssertUnwindSafe(|| handler.handle(request))) {
            Ok(result) => result,
            Err(_) => {
                log::error!("Render worker {} panicked on job {}", index, id);
                handler = factory(index);
                shared.lock().crashed += 1;
                Err(ReplayError::WorkerCrashed { worker: index })
            }
        };

        let mut state = shared.lock();
        let current_epoch = state.epoch;
        let slot = &mut state.slots[index];
        let reply = slot
            .reply
            .take()
            .filter(|reply| epoch == current_epoch && !reply.is_canceled());
        slot.job_id = None;
        match reply {
            Some(reply) => {
                let _ = reply.send(result);
                state.completed += 1;
            }
            None => {
                log::debug!("Discarding stale result of job {} (epoch {})", id, epoch);
                state.stale += 1;
            }
        }
    }
}
