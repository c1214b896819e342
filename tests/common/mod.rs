//! Shared helpers for scheduler integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use strand::{CancelToken, Error, Scheduler};

/// Generous upper bound for any single test wait.
pub const WAIT: Duration = Duration::from_secs(5);

/// Thread-safe observation log shared between test work items.
#[derive(Clone, Default)]
pub struct Log {
    entries: Arc<Mutex<Vec<i64>>>,
}

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, value: i64) {
        self.entries.lock().expect("log lock").push(value);
    }

    pub fn snapshot(&self) -> Vec<i64> {
        self.entries.lock().expect("log lock").clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("log lock").len()
    }
}

/// Joins the scheduler: resolves once everything submitted so far —
/// including all pending resumptions — has completed.
pub fn drain(scheduler: &Scheduler) {
    scheduler
        .set_barrier_await()
        .wait_timeout(WAIT)
        .expect("scheduler should drain within the test budget")
        .expect("drain barrier should resolve cleanly");
}

/// Spins until `predicate` holds or the test budget elapses.
pub fn wait_until(predicate: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !predicate() {
        assert!(
            Instant::now() < deadline,
            "condition not reached within the test budget"
        );
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Stands in for a long cancellable delay: resolves only when the token
/// trips, and then as a cancellation error.
pub async fn cancellable_wait(token: CancelToken) -> strand::Result<()> {
    token.cancelled().await;
    Err(Error::cancelled())
}

/// Parks the scheduler on a gate action while `submit` runs, so every
/// submission made inside queues up before any of it executes. Ordering
/// assertions need this: without it an early task's resumption can slip
/// in ahead of later submissions still leaving the submitting thread.
pub fn with_gated_submissions<R>(scheduler: &Scheduler, submit: impl FnOnce() -> R) -> R {
    let release = Arc::new(AtomicBool::new(false));
    let gate = Arc::clone(&release);
    scheduler
        .invoke(move || {
            while !gate.load(Ordering::SeqCst) {
                std::thread::yield_now();
            }
        })
        .expect("gate action accepted");
    let result = submit();
    release.store(true, Ordering::SeqCst);
    result
}
