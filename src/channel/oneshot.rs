//! Single-use completion channel.
//!
//! One sender, one receiver, one value. The receiver side supports both
//! asynchronous receive (the [`Receiver`] is a future) and blocking
//! receive ([`Receiver::wait`] / [`Receiver::wait_timeout`]), so a
//! completion can be observed from plain threads as well as from tasks.
//!
//! # Resolution semantics
//!
//! - `send` delivers the value and wakes/signals the receiver
//! - Dropping the sender without sending closes the channel; the receiver
//!   observes [`RecvError::Closed`]
//! - Dropping the receiver makes `send` report the value back to the
//!   caller; nothing is silently lost

use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

/// Error returned when receiving fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    /// The sender was dropped without sending a value.
    Closed,
}

impl std::fmt::Display for RecvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "receiving on a closed oneshot channel"),
        }
    }
}

impl std::error::Error for RecvError {}

#[derive(Debug)]
struct Shared<T> {
    state: Mutex<Inner<T>>,
    cvar: Condvar,
}

#[derive(Debug)]
struct Inner<T> {
    value: Option<T>,
    sender_dropped: bool,
    receiver_dropped: bool,
    waker: Option<Waker>,
}

impl<T> Inner<T> {
    const fn new() -> Self {
        Self {
            value: None,
            sender_dropped: false,
            receiver_dropped: false,
            waker: None,
        }
    }

    fn is_resolved(&self) -> bool {
        self.value.is_some() || self.sender_dropped
    }
}

/// Creates a new oneshot channel, returning the sender and receiver halves.
#[must_use]
pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(Inner::new()),
        cvar: Condvar::new(),
    });
    (
        Sender {
            shared: Arc::clone(&shared),
        },
        Receiver { shared },
    )
}

/// The sending half of a oneshot channel.
#[derive(Debug)]
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Sender<T> {
    /// Sends the value, consuming the sender.
    ///
    /// Returns the value back if the receiver is already gone.
    pub fn send(self, value: T) -> Result<(), T> {
        let waker = {
            let mut inner = self.shared.state.lock();
            if inner.receiver_dropped {
                return Err(value);
            }
            inner.value = Some(value);
            self.shared.cvar.notify_all();
            inner.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(())
    }

    /// Returns true if the receiving half is still alive.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.shared.state.lock().receiver_dropped
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let waker = {
            let mut inner = self.shared.state.lock();
            // A consumed sender already stored its value; closing is only
            // observable when nothing was sent.
            inner.sender_dropped = true;
            self.shared.cvar.notify_all();
            inner.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// The receiving half of a oneshot channel.
///
/// The receiver is itself a future resolving to `Result<T, RecvError>`.
#[derive(Debug)]
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Receiver<T> {
    /// Attempts to take the value without blocking.
    pub fn try_recv(&self) -> Option<Result<T, RecvError>> {
        let mut inner = self.shared.state.lock();
        if let Some(value) = inner.value.take() {
            return Some(Ok(value));
        }
        if inner.sender_dropped {
            return Some(Err(RecvError::Closed));
        }
        None
    }

    /// Blocks the current thread until the channel resolves.
    pub fn wait(self) -> Result<T, RecvError> {
        let mut inner = self.shared.state.lock();
        while !inner.is_resolved() {
            self.shared.cvar.wait(&mut inner);
        }
        match inner.value.take() {
            Some(value) => Ok(value),
            None => Err(RecvError::Closed),
        }
    }

    /// Blocks the current thread until the channel resolves or the timeout
    /// elapses. Returns `None` on timeout.
    pub fn wait_timeout(self, timeout: Duration) -> Option<Result<T, RecvError>> {
        let deadline = std::time::Instant::now() + timeout;
        let mut inner = self.shared.state.lock();
        while !inner.is_resolved() {
            if self
                .shared
                .cvar
                .wait_until(&mut inner, deadline)
                .timed_out()
            {
                return None;
            }
        }
        match inner.value.take() {
            Some(value) => Some(Ok(value)),
            None => Some(Err(RecvError::Closed)),
        }
    }
}

impl<T> Future for Receiver<T> {
    type Output = Result<T, RecvError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.shared.state.lock();
        if let Some(value) = inner.value.take() {
            return Poll::Ready(Ok(value));
        }
        if inner.sender_dropped {
            return Poll::Ready(Err(RecvError::Closed));
        }
        match &mut inner.waker {
            Some(existing) if existing.will_wake(cx.waker()) => {}
            slot => *slot = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.shared.state.lock().receiver_dropped = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;
    use std::thread;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn wake_by_ref(self: &Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn send_then_wait() {
        let (tx, rx) = channel::<u32>();
        tx.send(7).expect("receiver alive");
        assert_eq!(rx.wait(), Ok(7));
    }

    #[test]
    fn wait_blocks_until_send() {
        let (tx, rx) = channel::<&'static str>();
        let handle = thread::spawn(move || rx.wait());
        thread::sleep(Duration::from_millis(10));
        tx.send("done").expect("receiver alive");
        assert_eq!(handle.join().expect("receiver thread"), Ok("done"));
    }

    #[test]
    fn dropped_sender_closes() {
        let (tx, rx) = channel::<u32>();
        drop(tx);
        assert_eq!(rx.wait(), Err(RecvError::Closed));
    }

    #[test]
    fn dropped_receiver_returns_value() {
        let (tx, rx) = channel::<u32>();
        drop(rx);
        assert_eq!(tx.send(5), Err(5));
    }

    #[test]
    fn try_recv_states() {
        let (tx, rx) = channel::<u32>();
        assert_eq!(rx.try_recv(), None);
        tx.send(9).expect("receiver alive");
        assert_eq!(rx.try_recv(), Some(Ok(9)));
    }

    #[test]
    fn wait_timeout_expires_without_sender_activity() {
        let (tx, rx) = channel::<u32>();
        let result = rx.wait_timeout(Duration::from_millis(20));
        assert!(result.is_none(), "unresolved channel should time out");
        drop(tx);
    }

    #[test]
    fn future_wakes_on_send() {
        let (tx, mut rx) = channel::<u32>();
        let counting = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counting));
        let mut cx = Context::from_waker(&waker);

        assert!(Pin::new(&mut rx).poll(&mut cx).is_pending());
        tx.send(3).expect("receiver alive");
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
        assert_eq!(Pin::new(&mut rx).poll(&mut cx), Poll::Ready(Ok(3)));
    }

    #[test]
    fn future_wakes_on_close() {
        let (tx, mut rx) = channel::<u32>();
        let counting = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(Arc::clone(&counting));
        let mut cx = Context::from_waker(&waker);

        assert!(Pin::new(&mut rx).poll(&mut cx).is_pending());
        drop(tx);
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
        assert_eq!(
            Pin::new(&mut rx).poll(&mut cx),
            Poll::Ready(Err(RecvError::Closed))
        );
    }
}
