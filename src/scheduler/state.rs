//! The queue state machine guarded by the scheduler mutex.
//!
//! Three FIFO queues coexist: `active` feeds the run loop; `pending`
//! buffers submissions during an atomic window; `barrier` defers
//! everything submitted after a barrier until the barrier is consumed.
//! All fields here are protected by the scheduler's single mutex; the
//! running-async counter lives outside as a documented atomic.

use super::work::{Work, WorkId};
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub(crate) struct SchedulerState {
    /// Work the run loop dequeues from.
    pub(crate) active: VecDeque<Work>,
    /// Submissions buffered while an atomic window is open.
    pub(crate) pending: VecDeque<Work>,
    /// Submissions deferred behind an unconsumed barrier.
    pub(crate) barrier: VecDeque<Work>,
    /// A run loop is spawned or running.
    pub(crate) loop_spawned: bool,
    /// An atomic window is open.
    pub(crate) in_atomic: bool,
    /// Identity of the work owning the open atomic window.
    pub(crate) atomic_work: Option<WorkId>,
    /// A barrier has been submitted and not yet consumed.
    pub(crate) in_barrier: bool,
    /// Barrier parked until the scheduler is quiescent.
    pub(crate) waiting_barrier: Option<Work>,
    /// This scheduler is parked as a rendezvous waiter.
    pub(crate) waiting_sync: Option<Work>,
    /// This scheduler is parked as a rendezvous owner.
    pub(crate) waiting_owned_sync: Option<Work>,
    /// A non-atomic protected region is executing outside the loop; the
    /// scheduler stays parked until it ends. (Atomic protected work is
    /// isolated by the queue swap instead and needs the loop for its own
    /// continuations.)
    pub(crate) owner_sync_active: bool,
    /// The scheduler has been closed.
    pub(crate) disposed: bool,
}

impl SchedulerState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// True while parked in a rendezvous: as waiter, as owner awaiting
    /// arrivals, or while the owner's non-atomic protected region runs.
    /// The run loop exits instead of dequeuing while parked.
    pub(crate) fn parked_in_sync(&self) -> bool {
        self.waiting_sync.is_some() || self.waiting_owned_sync.is_some() || self.owner_sync_active
    }

    /// Swaps the active and pending queues.
    ///
    /// Called on atomic-window entry so deferred submissions collect in
    /// `pending` while only the atomic work's continuations feed the
    /// loop, and again on exit so the deferred items regain priority.
    pub(crate) fn swap_queues(&mut self) {
        std::mem::swap(&mut self.active, &mut self.pending);
    }
}
