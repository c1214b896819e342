use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future that suspends once and resumes on the next scheduler turn.
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Yields the scheduler to other queued work, resuming afterwards.
///
/// Inside an atomic window only continuations of the atomic work run, so
/// yielding there does not admit interleaving.
#[must_use]
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}
