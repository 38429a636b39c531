//! Worker pool
//!
//! Fixed set of threads that process ready events of one batch in parallel.
//! When every worker is busy the caller processes the event itself, so a
//! batch always makes progress.
//!
//! The dispatcher calls [`WorkerPool::wait_batch`] before waiting for new
//! readiness, so no two threads ever touch the same session.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;

/// Default number of worker threads
pub const DEFAULT_WORKER_THREADS: usize = 2;

/// Upper bound on worker threads
pub const MAX_WORKER_THREADS: usize = 16;

/// Longest an idle worker sleeps before re-checking for termination
const IDLE_WAIT: Duration = Duration::from_millis(100);

struct Slot<J> {
    job: Option<J>,
    busy: bool,
}

struct Worker<J> {
    slot: Mutex<Slot<J>>,
    wake: Condvar,
}

struct Shared<J> {
    process: Box<dyn Fn(J) + Send + Sync>,
    /// Jobs handed to workers and not finished yet
    in_flight: Mutex<usize>,
    batch_done: Condvar,
    cancel: CancellationToken,
}

/// Pool of worker threads processing jobs of type `J`
pub struct WorkerPool<J: Send + 'static> {
    shared: Arc<Shared<J>>,
    workers: Vec<Arc<Worker<J>>>,
    handles: Vec<JoinHandle<()>>,
}

/// Thread count actually used for a requested pool size
///
/// Sizes above [`MAX_WORKER_THREADS`] are clamped; 0 and 1 mean no pool
/// threads at all.
pub fn effective_size(requested: usize) -> usize {
    let size = if requested > MAX_WORKER_THREADS {
        tracing::warn!(
            requested,
            max = MAX_WORKER_THREADS,
            "worker pool size too large, clamping"
        );
        MAX_WORKER_THREADS
    } else {
        requested
    };
    if size <= 1 { 0 } else { size }
}

impl<J: Send + 'static> WorkerPool<J> {
    /// Start a pool running `process` for every dispatched job
    pub fn new<F>(requested: usize, cancel: CancellationToken, process: F) -> Self
    where
        F: Fn(J) + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            process: Box::new(process),
            in_flight: Mutex::new(0),
            batch_done: Condvar::new(),
            cancel,
        });

        let size = effective_size(requested);
        let mut workers = Vec::with_capacity(size);
        let mut handles = Vec::with_capacity(size);
        for index in 0..size {
            let worker = Arc::new(Worker {
                slot: Mutex::new(Slot {
                    job: None,
                    busy: false,
                }),
                wake: Condvar::new(),
            });

            let thread_shared = Arc::clone(&shared);
            let thread_worker = Arc::clone(&worker);
            let spawned = std::thread::Builder::new()
                .name(format!("ptcp-worker-{index}"))
                .spawn(move || worker_loop(&thread_shared, &thread_worker));

            match spawned {
                Ok(handle) => {
                    workers.push(worker);
                    handles.push(handle);
                }
                Err(e) => {
                    tracing::error!(worker = index, error = %e, "failed to spawn worker thread");
                }
            }
        }

        tracing::debug!(workers = workers.len(), "worker pool started");
        Self {
            shared,
            workers,
            handles,
        }
    }

    /// Number of running worker threads
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Hand `job` to an idle worker, or run it on the calling thread
    pub fn dispatch(&self, job: J) {
        let mut job = Some(job);
        for worker in &self.workers {
            let mut slot = worker.slot.lock();
            if slot.busy {
                continue;
            }
            *self.shared.in_flight.lock() += 1;
            slot.busy = true;
            slot.job = job.take();
            worker.wake.notify_one();
            return;
        }

        if let Some(job) = job {
            run_job(&self.shared, job);
        }
    }

    /// Block until every job handed to a worker has finished
    pub fn wait_batch(&self) {
        let mut in_flight = self.shared.in_flight.lock();
        while *in_flight > 0 {
            self.shared.batch_done.wait_for(&mut in_flight, IDLE_WAIT);
        }
    }

    /// Stop and join every worker
    ///
    /// Jobs already handed out are finished first. Idempotent.
    pub fn shutdown(&mut self) {
        self.shared.cancel.cancel();
        for worker in &self.workers {
            let _slot = worker.slot.lock();
            worker.wake.notify_all();
        }
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
        self.workers.clear();
    }
}

impl<J: Send + 'static> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop<J>(shared: &Shared<J>, worker: &Worker<J>) {
    loop {
        let job = {
            let mut slot = worker.slot.lock();
            loop {
                if let Some(job) = slot.job.take() {
                    break Some(job);
                }
                if shared.cancel.is_cancelled() {
                    break None;
                }
                worker.wake.wait_for(&mut slot, IDLE_WAIT);
            }
        };
        let Some(job) = job else {
            return;
        };

        run_job(shared, job);

        worker.slot.lock().busy = false;
        let mut in_flight = shared.in_flight.lock();
        *in_flight -= 1;
        if *in_flight == 0 {
            shared.batch_done.notify_all();
        }
    }
}

fn run_job<J>(shared: &Shared<J>, job: J) {
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| (shared.process)(job))) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".into());
        tracing::error!(panic = %message, "event processing panicked");
    }
}

#[cfg(test)]
#[path = "worker_test.rs"]
mod worker_test;
