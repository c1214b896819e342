//! Shared background workers for scheduler run loops.
//!
//! Schedulers hand their run loops off to this pool rather than owning
//! threads. Workers are created lazily up to the configured cap, park on a
//! condvar while idle, and are replaced if a job unwinds (a propagated
//! user fault takes the worker with it; the queue must keep draining).
//!
//! Run loops never block a worker while waiting for work of their own —
//! they exit and are respawned on demand — so a bounded pool cannot
//! deadlock scheduler-to-scheduler coordination.

use crate::config::PoolConfig;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use tracing::{error, trace};

type Job = Box<dyn FnOnce() + Send + 'static>;

static POOL: OnceLock<Pool> = OnceLock::new();
static WORKER_SEQ: AtomicUsize = AtomicUsize::new(0);

fn pool() -> &'static Pool {
    POOL.get_or_init(|| Pool::new(PoolConfig::from_env_validated()))
}

/// Schedules a job on the shared pool.
pub(crate) fn spawn(job: impl FnOnce() + Send + 'static) {
    pool().schedule(Box::new(job));
}

struct PoolState {
    queue: VecDeque<Job>,
    idle: usize,
    workers: usize,
}

struct Pool {
    state: Mutex<PoolState>,
    cvar: Condvar,
    max_threads: usize,
}

impl Pool {
    fn new(config: PoolConfig) -> Self {
        Self {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                idle: 0,
                workers: 0,
            }),
            cvar: Condvar::new(),
            max_threads: config.max_threads,
        }
    }

    fn schedule(&'static self, job: Job) {
        let mut state = self.state.lock();
        state.queue.push_back(job);
        if state.idle > 0 {
            self.cvar.notify_one();
        } else if state.workers < self.max_threads {
            state.workers += 1;
            drop(state);
            self.start_worker();
        }
    }

    fn start_worker(&'static self) {
        let id = WORKER_SEQ.fetch_add(1, Ordering::Relaxed);
        let builder = std::thread::Builder::new().name(format!("strand-worker-{id}"));
        let spawned = builder.spawn(move || self.worker_main());
        if let Err(err) = spawned {
            // Undo the reservation so a later schedule can retry.
            self.state.lock().workers -= 1;
            error!(error = %err, "failed to spawn pool worker");
        }
    }

    fn worker_main(&'static self) {
        // Workers only exit by unwinding; the guard keeps the census
        // accurate and replaces the worker when jobs are still queued.
        let _guard = WorkerGuard { pool: self };
        trace!("pool worker started");
        loop {
            let job = {
                let mut state = self.state.lock();
                loop {
                    if let Some(job) = state.queue.pop_front() {
                        break job;
                    }
                    state.idle += 1;
                    self.cvar.wait(&mut state);
                    state.idle -= 1;
                }
            };
            job();
        }
    }
}

struct WorkerGuard {
    pool: &'static Pool,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        let respawn = {
            let mut state = self.pool.state.lock();
            state.workers -= 1;
            if state.queue.is_empty() {
                false
            } else {
                state.workers += 1;
                true
            }
        };
        if respawn {
            error!("pool worker lost to a propagated fault; replacing");
            self.pool.start_worker();
        } else {
            trace!("pool worker lost to a propagated fault");
        }
    }
}
