//! Cross-scheduler synchronization rendezvous.
//!
//! A rendezvous joins one owner scheduler with one or more waiter
//! schedulers for the duration of a single sync-qualified work item. The
//! owner and every waiter park their run loops and call their arrival
//! hooks; whichever arrival crosses the counter to zero wakes the owner —
//! so the protected work may execute on the owner's or on any waiter's
//! pool thread. Neither side ever takes the peer's mutex: arrival and
//! release are plain method calls on unlocked shared state.

use super::Scheduler;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared state for one sync-qualified work item.
pub(crate) struct Rendezvous {
    owner: Scheduler,
    /// Waiter schedulers, excluding the owner; duplicate-free.
    participants: SmallVec<[Scheduler; 2]>,
    /// Outstanding arrivals: every participant plus the owner.
    remaining: AtomicUsize,
}

impl Rendezvous {
    pub(crate) fn new(owner: Scheduler, participants: SmallVec<[Scheduler; 2]>) -> Arc<Self> {
        let remaining = AtomicUsize::new(participants.len() + 1);
        Arc::new(Self {
            owner,
            participants,
            remaining,
        })
    }

    pub(crate) fn participants(&self) -> &[Scheduler] {
        &self.participants
    }

    /// Called by the owner's run loop once it has parked on this work.
    pub(crate) fn owner_arrived(self: &Arc<Self>) {
        debug!(owner = self.owner.name(), "rendezvous: owner arrived");
        self.arrive();
    }

    /// Called by a waiter's run loop once it has parked on its marker.
    pub(crate) fn waiter_arrived(self: &Arc<Self>) {
        debug!(owner = self.owner.name(), "rendezvous: waiter arrived");
        self.arrive();
    }

    /// The arrival that observes the counter crossing to zero is the
    /// unique caller of the owner's ready hook.
    fn arrive(self: &Arc<Self>) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            debug!(owner = self.owner.name(), "rendezvous: complete");
            self.owner.core().sync_ready(self);
        }
    }

    /// Releases every waiter after the protected region has ended.
    pub(crate) fn release(self: &Arc<Self>) {
        debug!(owner = self.owner.name(), "rendezvous: releasing waiters");
        for participant in &self.participants {
            participant.core().sync_end(self);
        }
    }
}

impl std::fmt::Debug for Rendezvous {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rendezvous")
            .field("owner", &self.owner.name())
            .field("participants", &self.participants.len())
            .field("remaining", &self.remaining.load(Ordering::Relaxed))
            .finish()
    }
}
