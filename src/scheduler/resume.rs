//! Continuation routing for suspended asynchronous work.
//!
//! Every asynchronous work item gets a [`TaskSlot`]: the parking place for
//! its suspended future and the waker handed to every poll. When the
//! future's waker fires — on whatever thread the wake originates — the
//! slot re-enters the owning scheduler by enqueueing a Post work item, so
//! resumptions stay serialized with the rest of the queue.
//!
//! [`WakeState`] deduplicates wakes: a wake that lands while the future is
//! being polled re-enqueues exactly one Post after the poll returns, and
//! duplicate wakes coalesce into one queued Post.

use super::rendezvous::Rendezvous;
use super::work::{CompletionSender, TaskFuture, Work, WorkId};
use super::SchedulerCore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::Wake;

const IDLE: u8 = 0;
const POLLING: u8 = 1;
const NOTIFIED: u8 = 2;
const POLLING_NOTIFIED: u8 = 3;
const DONE: u8 = 4;

/// Wake deduplication state machine for one asynchronous work item.
#[derive(Debug)]
pub(crate) struct WakeState(AtomicU8);

impl WakeState {
    /// Creates the state for a task about to receive its first poll.
    pub(crate) fn new_polling() -> Self {
        Self(AtomicU8::new(POLLING))
    }

    /// Records a wake. Returns true if the caller must enqueue a Post.
    pub(crate) fn notify(&self) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let (next, enqueue) = match current {
                IDLE => (NOTIFIED, true),
                POLLING => (POLLING_NOTIFIED, false),
                NOTIFIED | POLLING_NOTIFIED | DONE => return false,
                other => unreachable!("invalid wake state {other}"),
            };
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return enqueue,
                Err(actual) => current = actual,
            }
        }
    }

    /// Marks the start of a poll (the queued Post is being executed).
    pub(crate) fn begin_poll(&self) {
        self.0.store(POLLING, Ordering::Release);
    }

    /// Marks the end of a poll that returned `Pending`. Returns true if a
    /// wake landed during the poll and the caller must enqueue a Post.
    pub(crate) fn finish_poll(&self) -> bool {
        match self
            .0
            .compare_exchange(POLLING, IDLE, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => false,
            Err(_) => {
                // A wake landed mid-poll; the Post we are about to enqueue
                // re-owns the NOTIFIED state.
                self.0.store(NOTIFIED, Ordering::Release);
                true
            }
        }
    }

    /// Marks the task complete; later wakes are ignored.
    pub(crate) fn complete(&self) {
        self.0.store(DONE, Ordering::Release);
    }
}

/// Completion metadata carried by a suspended asynchronous work item.
pub(crate) struct AsyncMeta {
    /// The work entered an atomic window that must be exited on completion.
    pub(crate) atomic: bool,
    /// Promise to resolve exactly once with the task outcome.
    pub(crate) completion: Option<CompletionSender>,
    /// Rendezvous whose release is deferred to completion (atomic sync
    /// work only; non-atomic sync work releases at its first yield).
    pub(crate) sync: Option<Arc<Rendezvous>>,
}

/// Parking slot and waker for one asynchronous work item.
pub(crate) struct TaskSlot {
    /// Identity of the originating work; Posts inherit it so atomic-window
    /// routing can recognize continuations of the atomic work.
    pub(crate) id: WorkId,
    core: Weak<SchedulerCore>,
    pub(crate) wake: WakeState,
    pub(crate) future: Mutex<Option<TaskFuture>>,
    /// Taken exactly once on completion.
    pub(crate) meta: Mutex<Option<AsyncMeta>>,
}

impl TaskSlot {
    pub(crate) fn new(id: WorkId, core: Weak<SchedulerCore>, meta: AsyncMeta) -> Self {
        Self {
            id,
            core,
            wake: WakeState::new_polling(),
            future: Mutex::new(None),
            meta: Mutex::new(Some(meta)),
        }
    }

    fn schedule(self: &Arc<Self>) {
        if self.wake.notify() {
            if let Some(core) = self.core.upgrade() {
                core.enqueue_post(Work::post(Arc::clone(self)));
            }
        }
    }
}

impl Wake for TaskSlot {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}

impl std::fmt::Debug for TaskSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSlot")
            .field("id", &self.id)
            .field("wake", &self.wake)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_wake_enqueues_later_wakes_coalesce() {
        let state = WakeState::new_polling();
        assert!(!state.finish_poll(), "no wake during first poll");

        assert!(state.notify(), "first wake after Pending must enqueue");
        assert!(!state.notify(), "second wake must coalesce");

        state.begin_poll();
        assert!(!state.finish_poll());
    }

    #[test]
    fn wake_during_poll_defers_enqueue() {
        let state = WakeState::new_polling();
        assert!(
            !state.notify(),
            "wake during poll must not enqueue immediately"
        );
        assert!(
            state.finish_poll(),
            "poll end must report the deferred wake"
        );
        // The deferred Post owns the NOTIFIED state; further wakes coalesce.
        assert!(!state.notify());
    }

    #[test]
    fn completed_task_ignores_wakes() {
        let state = WakeState::new_polling();
        state.complete();
        assert!(!state.notify(), "wakes after completion are ignored");
    }
}
