//! Scheduler-wide cancellation.
//!
//! A [`CancelSource`] is owned by a scheduler and is triggered exactly once
//! when the scheduler closes. [`CancelToken`] handles are handed to work
//! items that requested one; user tasks observe the token and unwind.
//!
//! Cancellation is cooperative: triggering the source wakes every task
//! currently suspended on [`CancelToken::cancelled`], and any later await
//! of the token completes immediately.

use parking_lot::Mutex;
use smallvec::SmallVec;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    /// Registered waiters, keyed by the identity of the waiting future so
    /// re-polls replace rather than accumulate.
    waiters: Mutex<SmallVec<[(u64, Waker); 4]>>,
    next_waiter_id: AtomicU64,
}

impl CancelInner {
    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let waiters = std::mem::take(&mut *self.waiters.lock());
        for (_, waker) in waiters {
            waker.wake();
        }
    }

    fn register(&self, id: u64, waker: &Waker) {
        let mut waiters = self.waiters.lock();
        if let Some((_, existing)) = waiters.iter_mut().find(|(wid, _)| *wid == id) {
            if !existing.will_wake(waker) {
                *existing = waker.clone();
            }
        } else {
            waiters.push((id, waker.clone()));
        }
    }

    fn deregister(&self, id: u64) {
        let mut waiters = self.waiters.lock();
        if let Some(pos) = waiters.iter().position(|(wid, _)| *wid == id) {
            waiters.swap_remove(pos);
        }
    }
}

/// The triggering side of a cancellation domain.
///
/// Created lazily by a scheduler on the first token request; triggered by
/// `close()`. Triggering is idempotent.
#[derive(Debug, Default)]
pub struct CancelSource {
    inner: Arc<CancelInner>,
}

impl CancelSource {
    /// Creates a new, untriggered source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Triggers cancellation, waking all suspended waiters.
    ///
    /// Only the first call has an effect.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Returns true if the source has been triggered.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Returns a token observing this source.
    #[must_use]
    pub fn token(&self) -> CancelToken {
        CancelToken {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// The observing side of a cancellation domain.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    /// Returns true if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Returns a future that resolves once cancellation is requested.
    ///
    /// The future is cancel-safe: dropping it deregisters its waiter slot.
    #[must_use]
    pub fn cancelled(&self) -> Cancelled {
        Cancelled {
            inner: Arc::clone(&self.inner),
            waiter_id: None,
        }
    }
}

/// Future returned by [`CancelToken::cancelled`].
#[derive(Debug)]
pub struct Cancelled {
    inner: Arc<CancelInner>,
    waiter_id: Option<u64>,
}

impl Future for Cancelled {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.inner.cancelled.load(Ordering::Acquire) {
            return Poll::Ready(());
        }
        if self.waiter_id.is_none() {
            let id = self.inner.next_waiter_id.fetch_add(1, Ordering::Relaxed);
            self.waiter_id = Some(id);
        }
        let id = self.waiter_id.expect("waiter id assigned above");
        self.inner.register(id, cx.waker());
        // A cancel may have raced with registration.
        if self.inner.cancelled.load(Ordering::Acquire) {
            self.inner.deregister(id);
            return Poll::Ready(());
        }
        Poll::Pending
    }
}

impl Drop for Cancelled {
    fn drop(&mut self) {
        if let Some(id) = self.waiter_id {
            self.inner.deregister(id);
        }
    }
}
