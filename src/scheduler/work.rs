//! Work records: one queued unit of scheduler work.
//!
//! A [`Work`] is a tagged variant with a single execution entry point in
//! the run loop; there is no per-kind type hierarchy. The payload carries
//! the user callable (state lives in its captures), and the record carries
//! the option bits, an optional completion promise, and an optional
//! rendezvous reference for sync-qualified work.

use super::rendezvous::Rendezvous;
use super::resume::TaskSlot;
use crate::cancel::CancelToken;
use crate::channel::oneshot;
use crate::error::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A boxed asynchronous work payload.
pub(crate) type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

/// Sending half of a completion promise.
pub(crate) type CompletionSender = oneshot::Sender<Result<()>>;

static WORK_SEQ: AtomicU64 = AtomicU64::new(1);

/// Identity of a queued work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WorkId(u64);

impl WorkId {
    /// Allocates the next work id.
    pub(crate) fn next() -> Self {
        Self(WORK_SEQ.fetch_add(1, Ordering::Relaxed))
    }
}

/// Option bits carried by a work record.
///
/// `ATOMIC` is the only publicly selectable bit; the high bits mark
/// internal kinds and are reserved so future public options can compose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct WorkOptions(u32);

impl WorkOptions {
    pub(crate) const NORMAL: Self = Self(0);
    pub(crate) const ATOMIC: Self = Self(1);
    pub(crate) const POST: Self = Self(256);
    pub(crate) const BARRIER: Self = Self(512);
    pub(crate) const SYNC: Self = Self(1024);

    /// Returns true if every bit of `other` is set in `self`.
    #[must_use]
    pub(crate) const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub(crate) const fn is_atomic(self) -> bool {
        self.contains(Self::ATOMIC)
    }

    #[must_use]
    pub(crate) const fn is_post(self) -> bool {
        self.contains(Self::POST)
    }

    #[must_use]
    pub(crate) const fn is_barrier(self) -> bool {
        self.contains(Self::BARRIER)
    }

    #[must_use]
    pub(crate) const fn is_sync_marker(self) -> bool {
        self.contains(Self::SYNC)
    }
}

/// The callable (or marker) carried by a work record.
pub(crate) enum Payload {
    /// Synchronous action; runs to completion inline.
    Action(Box<dyn FnOnce() + Send + 'static>),
    /// Asynchronous task producer.
    Task(Box<dyn FnOnce() -> TaskFuture + Send + 'static>),
    /// Asynchronous task producer receiving the shared cancellation token.
    TaskWithToken(
        Box<dyn FnOnce(CancelToken) -> TaskFuture + Send + 'static>,
        CancelToken,
    ),
    /// Continuation of a suspended asynchronous work item.
    Post(Arc<TaskSlot>),
    /// Queue partition marker.
    Barrier,
    /// Participation request parked on a waiter scheduler.
    SyncMark(Arc<Rendezvous>),
}

/// One queued unit: payload plus metadata.
pub(crate) struct Work {
    pub(crate) id: WorkId,
    pub(crate) options: WorkOptions,
    pub(crate) payload: Payload,
    pub(crate) completion: Option<CompletionSender>,
    /// Rendezvous this work owns (owner side). Marker works reference
    /// their rendezvous through the payload instead.
    pub(crate) sync: Option<Arc<Rendezvous>>,
}

impl Work {
    pub(crate) fn action(
        f: Box<dyn FnOnce() + Send + 'static>,
        sync: Option<Arc<Rendezvous>>,
    ) -> Self {
        Self {
            id: WorkId::next(),
            options: WorkOptions::NORMAL,
            payload: Payload::Action(f),
            completion: None,
            sync,
        }
    }

    pub(crate) fn task(
        f: Box<dyn FnOnce() -> TaskFuture + Send + 'static>,
        options: WorkOptions,
        completion: Option<CompletionSender>,
        sync: Option<Arc<Rendezvous>>,
    ) -> Self {
        Self {
            id: WorkId::next(),
            options,
            payload: Payload::Task(f),
            completion,
            sync,
        }
    }

    pub(crate) fn task_with_token(
        f: Box<dyn FnOnce(CancelToken) -> TaskFuture + Send + 'static>,
        token: CancelToken,
        options: WorkOptions,
        completion: Option<CompletionSender>,
        sync: Option<Arc<Rendezvous>>,
    ) -> Self {
        Self {
            id: WorkId::next(),
            options,
            payload: Payload::TaskWithToken(f, token),
            completion,
            sync,
        }
    }

    pub(crate) fn barrier(completion: Option<CompletionSender>) -> Self {
        Self {
            id: WorkId::next(),
            options: WorkOptions::BARRIER,
            payload: Payload::Barrier,
            completion,
            sync: None,
        }
    }

    pub(crate) fn post(slot: Arc<TaskSlot>) -> Self {
        Self {
            id: slot.id,
            options: WorkOptions::POST,
            payload: Payload::Post(slot),
            completion: None,
            sync: None,
        }
    }

    pub(crate) fn sync_mark(rendezvous: Arc<Rendezvous>) -> Self {
        Self {
            id: WorkId::next(),
            options: WorkOptions::SYNC,
            payload: Payload::SyncMark(rendezvous),
            completion: None,
            sync: None,
        }
    }

    #[must_use]
    pub(crate) fn is_post(&self) -> bool {
        self.options.is_post()
    }

    #[must_use]
    pub(crate) fn is_barrier(&self) -> bool {
        self.options.is_barrier()
    }

    /// Diagnostic label for tracing.
    #[must_use]
    pub(crate) fn kind_name(&self) -> &'static str {
        match &self.payload {
            Payload::Action(_) => "action",
            Payload::Task(_) => "task",
            Payload::TaskWithToken(..) => "task+token",
            Payload::Post(_) => "post",
            Payload::Barrier => "barrier",
            Payload::SyncMark(_) => "sync-marker",
        }
    }

    /// Resolves a carried completion promise as cancelled and drops the
    /// work. Used for disposed-scheduler drops and `close()` drains.
    pub(crate) fn resolve_cancelled(self) {
        if let Some(tx) = self.completion {
            let _ = tx.send(Err(Error::cancelled()));
        }
    }
}

impl std::fmt::Debug for Work {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Work")
            .field("id", &self.id)
            .field("kind", &self.kind_name())
            .field("options", &self.options)
            .field("has_completion", &self.completion.is_some())
            .field("has_sync", &self.sync.is_some())
            .finish()
    }
}
