//! The scheduler engine: serialized, cooperatively interleaved execution.
//!
//! A [`Scheduler`] is a logical single-threaded execution domain. Work
//! items — synchronous actions or asynchronous tasks — are processed in
//! submission order, and no two items ever run their synchronous code
//! concurrently on the same scheduler. An asynchronous task that suspends
//! releases the scheduler, so later items may start their synchronous
//! prefixes before the earlier task resumes; resumptions re-enter the
//! queue as Post work items and stay serialized.
//!
//! Three primitives compose on top of that base:
//!
//! - **Atomic** tasks run without any interleaving until they complete
//!   (the queues are swapped for the duration of the window, so only the
//!   atomic task's own continuations feed the loop).
//! - **Barriers** partition the queue: everything submitted before the
//!   barrier — including all pending resumptions — completes before
//!   anything submitted after it starts.
//! - **Cross-scheduler sync** runs one work item with one or more other
//!   schedulers held idle for its protected region.
//!
//! The run loop executes on shared pool workers and never blocks one: it
//! exits whenever the queue is empty or the scheduler parks in a
//! rendezvous, and is respawned on demand.

mod rendezvous;
mod resume;
mod state;
mod work;
mod yield_now;

pub use yield_now::{yield_now, YieldNow};

use crate::cancel::{CancelSource, CancelToken};
use crate::channel::oneshot;
use crate::error::{Error, Result};
use crate::pool;
use parking_lot::Mutex;
use rendezvous::Rendezvous;
use resume::{AsyncMeta, TaskSlot};
use smallvec::SmallVec;
use state::SchedulerState;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll, Waker};
use std::time::Duration;
use tracing::{debug, trace};
use work::{CompletionSender, Payload, TaskFuture, Work, WorkId, WorkOptions};

static SCHEDULER_SEQ: AtomicU64 = AtomicU64::new(1);

type FaultHandler = Arc<dyn Fn(&Scheduler, &Error) + Send + Sync>;

/// Options for a single submission.
///
/// The default is a normal submission. [`InvokeOptions::atomic`] requests
/// an atomic window (asynchronous work only); [`InvokeOptions::sync_with`]
/// attaches a sync descriptor naming the schedulers to hold idle for the
/// work's protected region.
#[derive(Clone, Debug, Default)]
pub struct InvokeOptions {
    atomic: bool,
    sync_with: Option<Vec<Scheduler>>,
}

impl InvokeOptions {
    /// Normal submission options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options requesting an atomic window.
    #[must_use]
    pub fn atomic() -> Self {
        Self {
            atomic: true,
            sync_with: None,
        }
    }

    /// Attaches a sync descriptor naming one or more *other* schedulers.
    ///
    /// The descriptor is validated at submission: it must be non-empty,
    /// must not contain the submitting scheduler, and must contain no
    /// duplicates.
    #[must_use]
    pub fn sync_with<I>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = Scheduler>,
    {
        self.sync_with = Some(peers.into_iter().collect());
        self
    }

    /// Returns true if these options request an atomic window.
    #[must_use]
    pub fn is_atomic(&self) -> bool {
        self.atomic
    }
}

/// Resolution of an awaitable submission.
///
/// A `Completion` is a future yielding the work item's outcome; it also
/// supports blocking receipt for callers outside any task. Every
/// completion resolves exactly once: success, the task's fault, or
/// cancellation (the item was dropped by `close()` or its promise was
/// discarded unresolved).
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Result<()>>,
}

impl Completion {
    fn new(rx: oneshot::Receiver<Result<()>>) -> Self {
        Self { rx }
    }

    /// Blocks the current thread until the work item resolves.
    pub fn wait(self) -> Result<()> {
        match self.rx.wait() {
            Ok(outcome) => outcome,
            Err(oneshot::RecvError::Closed) => Err(unresolved()),
        }
    }

    /// Blocks until the work item resolves or the timeout elapses.
    /// Returns `None` on timeout.
    pub fn wait_timeout(self, timeout: Duration) -> Option<Result<()>> {
        match self.rx.wait_timeout(timeout)? {
            Ok(outcome) => Some(outcome),
            Err(oneshot::RecvError::Closed) => Some(Err(unresolved())),
        }
    }
}

impl Future for Completion {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|resolved| match resolved {
            Ok(outcome) => outcome,
            Err(oneshot::RecvError::Closed) => Err(unresolved()),
        })
    }
}

fn unresolved() -> Error {
    Error::cancelled().with_message("completion dropped before resolution")
}

/// A serialized work scheduler.
///
/// `Scheduler` is a cheap-clone handle; clones submit to the same queue.
/// Queued work keeps running even if every handle is dropped, as long as
/// the run loop holds the engine alive.
#[derive(Clone)]
pub struct Scheduler {
    core: Arc<SchedulerCore>,
}

impl Scheduler {
    /// Creates a scheduler with an auto-generated diagnostic name.
    #[must_use]
    pub fn new() -> Self {
        let seq = SCHEDULER_SEQ.fetch_add(1, Ordering::Relaxed);
        Self::named(format!("strand-{seq}"))
    }

    /// Creates a scheduler with the given diagnostic name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            core: Arc::new(SchedulerCore {
                name: name.into(),
                state: Mutex::new(SchedulerState::new()),
                running_async: AtomicUsize::new(0),
                cancel: OnceLock::new(),
                fault_handler: Mutex::new(None),
            }),
        }
    }

    /// Returns the diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Returns true once `close()` has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.state.lock().disposed
    }

    /// Returns the scheduler's shared cancellation token, creating the
    /// source on first use. The token trips when the scheduler closes.
    #[must_use]
    pub fn token(&self) -> CancelToken {
        self.core.token()
    }

    /// Installs the unhandled-fault observer.
    ///
    /// The observer is *not* serialized with the run loop and may be
    /// invoked on any thread; observers needing serialization should
    /// forward to a queue of their own.
    pub fn set_unhandled_handler<H>(&self, handler: H)
    where
        H: Fn(&Scheduler, &Error) + Send + Sync + 'static,
    {
        *self.core.fault_handler.lock() = Some(Arc::new(handler));
    }

    /// Removes the unhandled-fault observer.
    pub fn clear_unhandled_handler(&self) {
        *self.core.fault_handler.lock() = None;
    }

    /// Submits a synchronous action.
    pub fn invoke<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.invoke_with(action, InvokeOptions::new())
    }

    /// Submits a synchronous action with options.
    ///
    /// # Errors
    ///
    /// `Misuse` if the options request an atomic window (atomic requires
    /// an asynchronous work) or carry an invalid sync descriptor.
    pub fn invoke_with<F>(&self, action: F, options: InvokeOptions) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if options.atomic {
            return Err(Error::misuse("atomic requires an asynchronous work"));
        }
        let rendezvous = self.build_rendezvous(&options)?;
        self.submit(Work::action(Box::new(action), rendezvous));
        Ok(())
    }

    /// Submits an asynchronous task.
    pub fn invoke_async<F, Fut>(&self, f: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.invoke_async_with(f, InvokeOptions::new())
    }

    /// Submits an asynchronous task with options.
    pub fn invoke_async_with<F, Fut>(&self, f: F, options: InvokeOptions) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let rendezvous = self.build_rendezvous(&options)?;
        self.submit(Work::task(
            Box::new(move || Box::pin(f()) as TaskFuture),
            task_options(&options),
            None,
            rendezvous,
        ));
        Ok(())
    }

    /// Submits an asynchronous task that receives the shared cancellation
    /// token.
    pub fn invoke_async_token<F, Fut>(&self, f: F) -> Result<()>
    where
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.invoke_async_token_with(f, InvokeOptions::new())
    }

    /// Submits a token-receiving asynchronous task with options.
    pub fn invoke_async_token_with<F, Fut>(&self, f: F, options: InvokeOptions) -> Result<()>
    where
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let rendezvous = self.build_rendezvous(&options)?;
        let token = self.core.token();
        self.submit(Work::task_with_token(
            Box::new(move |token| Box::pin(f(token)) as TaskFuture),
            token,
            task_options(&options),
            None,
            rendezvous,
        ));
        Ok(())
    }

    /// Submits an asynchronous task and returns its completion.
    pub fn invoke_await<F, Fut>(&self, f: F) -> Result<Completion>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.invoke_await_with(f, InvokeOptions::new())
    }

    /// Submits an asynchronous task with options and returns its
    /// completion.
    pub fn invoke_await_with<F, Fut>(&self, f: F, options: InvokeOptions) -> Result<Completion>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let rendezvous = self.build_rendezvous(&options)?;
        let (tx, rx) = oneshot::channel();
        self.submit(Work::task(
            Box::new(move || Box::pin(f()) as TaskFuture),
            task_options(&options),
            Some(tx),
            rendezvous,
        ));
        Ok(Completion::new(rx))
    }

    /// Submits a token-receiving asynchronous task and returns its
    /// completion.
    pub fn invoke_await_token<F, Fut>(&self, f: F) -> Result<Completion>
    where
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.invoke_await_token_with(f, InvokeOptions::new())
    }

    /// Submits a token-receiving asynchronous task with options and
    /// returns its completion.
    pub fn invoke_await_token_with<F, Fut>(
        &self,
        f: F,
        options: InvokeOptions,
    ) -> Result<Completion>
    where
        F: FnOnce(CancelToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let rendezvous = self.build_rendezvous(&options)?;
        let token = self.core.token();
        let (tx, rx) = oneshot::channel();
        self.submit(Work::task_with_token(
            Box::new(move |token| Box::pin(f(token)) as TaskFuture),
            token,
            task_options(&options),
            Some(tx),
            rendezvous,
        ));
        Ok(Completion::new(rx))
    }

    /// Enqueues a barrier: everything submitted before it — including all
    /// pending resumptions — completes before anything submitted after it
    /// starts.
    pub fn set_barrier(&self) {
        self.submit(Work::barrier(None));
    }

    /// Enqueues a barrier and returns a completion that resolves when the
    /// barrier is consumed (all prior work fully complete).
    pub fn set_barrier_await(&self) -> Completion {
        let (tx, rx) = oneshot::channel();
        self.submit(Work::barrier(Some(tx)));
        Completion::new(rx)
    }

    /// Closes the scheduler (idempotent).
    ///
    /// Cancels the shared token, resolves the promises of all queued work
    /// as cancelled, and drops everything queued except Post work items —
    /// continuations of in-flight tasks still run so suspended tasks can
    /// observe the token and unwind. Later submissions are dropped after
    /// resolving their promises as cancelled.
    pub fn close(&self) {
        self.core.close();
    }

    pub(crate) fn core(&self) -> &Arc<SchedulerCore> {
        &self.core
    }

    fn build_rendezvous(&self, options: &InvokeOptions) -> Result<Option<Arc<Rendezvous>>> {
        let Some(peers) = &options.sync_with else {
            return Ok(None);
        };
        if peers.is_empty() {
            return Err(Error::misuse(
                "sync descriptor must name at least one other scheduler",
            ));
        }
        let mut participants: SmallVec<[Scheduler; 2]> = SmallVec::new();
        for peer in peers {
            if Arc::ptr_eq(&peer.core, &self.core) {
                return Err(Error::misuse(
                    "sync descriptor must not contain the submitting scheduler",
                ));
            }
            if participants
                .iter()
                .any(|existing| Arc::ptr_eq(&existing.core, &peer.core))
            {
                return Err(Error::misuse("sync descriptor contains duplicate schedulers"));
            }
            participants.push(peer.clone());
        }
        Ok(Some(Rendezvous::new(self.clone(), participants)))
    }

    /// Hands the work to the engine; on success, requests participation
    /// from every rendezvous waiter.
    fn submit(&self, work: Work) {
        let sync = work.sync.clone();
        if !self.core.enqueue(work) {
            return;
        }
        if let Some(rendezvous) = sync {
            for participant in rendezvous.participants() {
                participant
                    .core()
                    .enqueue(Work::sync_mark(Arc::clone(&rendezvous)));
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.core.name)
            .finish_non_exhaustive()
    }
}

fn task_options(options: &InvokeOptions) -> WorkOptions {
    if options.atomic {
        WorkOptions::ATOMIC
    } else {
        WorkOptions::NORMAL
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "user code panicked".to_owned()
    }
}

pub(crate) struct SchedulerCore {
    name: String,
    state: Mutex<SchedulerState>,
    /// Asynchronous tasks whose completion has not yet been observed.
    running_async: AtomicUsize,
    cancel: OnceLock<CancelSource>,
    fault_handler: Mutex<Option<FaultHandler>>,
}

impl SchedulerCore {
    fn token(&self) -> CancelToken {
        self.cancel.get_or_init(CancelSource::new).token()
    }

    /// Admits a submission. Returns false if the scheduler is disposed
    /// (the work is dropped after resolving its promise as cancelled).
    fn enqueue(self: &Arc<Self>, work: Work) -> bool {
        let mut st = self.state.lock();
        if st.disposed {
            drop(st);
            trace!(scheduler = %self.name, kind = work.kind_name(), "submission after close dropped");
            work.resolve_cancelled();
            return false;
        }
        trace!(scheduler = %self.name, kind = work.kind_name(), "enqueue");
        let is_barrier = work.is_barrier();
        if st.in_barrier {
            st.barrier.push_back(work);
        } else if st.in_atomic {
            st.pending.push_back(work);
        } else {
            st.active.push_back(work);
            self.spawn_loop_if_idle(&mut st);
        }
        // Everything submitted from here on is deferred until the barrier
        // is consumed.
        if is_barrier {
            st.in_barrier = true;
        }
        true
    }

    /// Admits a continuation. Posts bypass the disposed check (suspended
    /// tasks must still resume to observe cancellation) and the barrier
    /// deferral (quiescence needs them); during an atomic window only the
    /// atomic work's own continuations enter the active queue.
    pub(crate) fn enqueue_post(self: &Arc<Self>, work: Work) {
        let mut st = self.state.lock();
        trace!(scheduler = %self.name, "post");
        if st.in_atomic && st.atomic_work != Some(work.id) {
            st.pending.push_back(work);
        } else {
            st.active.push_back(work);
            self.spawn_loop_if_idle(&mut st);
        }
    }

    fn spawn_loop_if_idle(self: &Arc<Self>, st: &mut SchedulerState) {
        if st.loop_spawned || st.parked_in_sync() || st.active.is_empty() {
            return;
        }
        st.loop_spawned = true;
        let core = Arc::clone(self);
        pool::spawn(move || core.run_loop());
    }

    fn run_loop(self: Arc<Self>) {
        let _respawn = LoopGuard {
            core: Arc::clone(&self),
        };
        loop {
            let mut st = self.state.lock();
            if st.parked_in_sync() {
                st.loop_spawned = false;
                return;
            }
            let Some(work) = st.active.pop_front() else {
                st.loop_spawned = false;
                return;
            };
            trace!(scheduler = %self.name, kind = work.kind_name(), "dequeue");

            // Owner side of a rendezvous: park until every waiter arrives.
            if let Some(rendezvous) = work.sync.clone() {
                st.waiting_owned_sync = Some(work);
                drop(st);
                rendezvous.owner_arrived();
                continue;
            }

            if work.options.is_atomic() {
                assert!(
                    !st.in_atomic,
                    "atomic window already active on scheduler `{}`",
                    self.name
                );
                st.in_atomic = true;
                st.atomic_work = Some(work.id);
                st.swap_queues();
                drop(st);
                self.execute(work);
                continue;
            }

            if work.is_barrier() {
                if self.running_async.load(Ordering::SeqCst) > 0 {
                    // Quiescence pending; resumptions keep feeding the
                    // active queue until the last task completes.
                    st.waiting_barrier = Some(work);
                    continue;
                }
                let completion = self.consume_barrier_locked(&mut st, work);
                drop(st);
                if let Some(tx) = completion {
                    let _ = tx.send(Ok(()));
                }
                continue;
            }

            if work.options.is_sync_marker() {
                let rendezvous = match &work.payload {
                    Payload::SyncMark(r) => Arc::clone(r),
                    _ => unreachable!("sync option without marker payload"),
                };
                st.waiting_sync = Some(work);
                drop(st);
                rendezvous.waiter_arrived();
                continue;
            }

            drop(st);
            self.execute(work);
        }
    }

    fn execute(self: &Arc<Self>, work: Work) {
        debug_assert!(
            work.sync.is_none(),
            "sync-owning work must start through sync_ready"
        );
        let Work {
            id,
            options,
            payload,
            completion,
            ..
        } = work;
        match payload {
            Payload::Action(f) => self.run_action(f),
            Payload::Task(f) => {
                self.start_task(id, options.is_atomic(), completion, None, move || f());
            }
            Payload::TaskWithToken(f, token) => {
                self.start_task(id, options.is_atomic(), completion, None, move || f(token));
            }
            Payload::Post(slot) => self.poll_post(&slot),
            Payload::Barrier | Payload::SyncMark(_) => {
                unreachable!("markers are handled by the run loop")
            }
        }
    }

    fn run_action(self: &Arc<Self>, f: Box<dyn FnOnce() + Send + 'static>) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
            let err = Error::user(panic_message(payload.as_ref()));
            if !self.report_fault(&err) {
                resume_unwind(payload);
            }
        }
    }

    /// Invokes the task producer and runs the synchronous prefix (the
    /// first poll) inline. `deferred_sync` is the rendezvous whose release
    /// waits for task completion (atomic sync work only).
    fn start_task(
        self: &Arc<Self>,
        id: WorkId,
        atomic: bool,
        completion: Option<CompletionSender>,
        deferred_sync: Option<Arc<Rendezvous>>,
        make: impl FnOnce() -> TaskFuture,
    ) {
        match catch_unwind(AssertUnwindSafe(make)) {
            Ok(future) => {
                self.running_async.fetch_add(1, Ordering::SeqCst);
                let slot = Arc::new(TaskSlot::new(
                    id,
                    Arc::downgrade(self),
                    AsyncMeta {
                        atomic,
                        completion,
                        sync: deferred_sync,
                    },
                ));
                self.poll_task(&slot, future);
            }
            Err(payload) => {
                // The task never started, but the window it opened still
                // must close and its waiters still must be released.
                let err = Error::user(panic_message(payload.as_ref()));
                if atomic {
                    self.exit_atomic(deferred_sync);
                }
                let observed = completion.is_some();
                if let Some(tx) = completion {
                    let _ = tx.send(Err(err.clone()));
                }
                let handled = self.report_fault(&err);
                if !observed && !handled {
                    resume_unwind(payload);
                }
            }
        }
    }

    fn poll_post(self: &Arc<Self>, slot: &Arc<TaskSlot>) {
        let Some(future) = slot.future.lock().take() else {
            // Already completed; a stale wake raced completion.
            return;
        };
        slot.wake.begin_poll();
        self.poll_task(slot, future);
    }

    fn poll_task(self: &Arc<Self>, slot: &Arc<TaskSlot>, mut future: TaskFuture) {
        let waker = Waker::from(Arc::clone(slot));
        let mut cx = Context::from_waker(&waker);
        match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
            Ok(Poll::Pending) => {
                *slot.future.lock() = Some(future);
                if slot.wake.finish_poll() {
                    self.enqueue_post(Work::post(Arc::clone(slot)));
                }
            }
            Ok(Poll::Ready(outcome)) => {
                let _ = self.complete_task(slot, outcome);
            }
            Err(payload) => {
                let err = Error::user(panic_message(payload.as_ref()));
                if !self.complete_task(slot, Err(err)) {
                    resume_unwind(payload);
                }
            }
        }
    }

    /// Observes a task completion: resolves the promise, reports faults,
    /// exits an atomic window, and consumes a quiescent barrier. Returns
    /// true if a fault was observed by a promise or the fault handler.
    fn complete_task(self: &Arc<Self>, slot: &Arc<TaskSlot>, outcome: Result<()>) -> bool {
        let Some(meta) = slot.meta.lock().take() else {
            return true;
        };
        slot.wake.complete();
        let previous = self.running_async.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "running-async underflow");
        trace!(scheduler = %self.name, ok = outcome.is_ok(), "task complete");

        let observed = match outcome {
            Ok(()) => {
                if let Some(tx) = meta.completion {
                    let _ = tx.send(Ok(()));
                }
                true
            }
            Err(err) if err.is_cancelled() => {
                if let Some(tx) = meta.completion {
                    let _ = tx.send(Err(err));
                }
                true
            }
            Err(err) => {
                let has_promise = meta.completion.is_some();
                if let Some(tx) = meta.completion {
                    let _ = tx.send(Err(err.clone()));
                }
                let handled = self.report_fault(&err);
                has_promise || handled
            }
        };

        if meta.atomic {
            self.exit_atomic(meta.sync);
        }
        self.check_quiescence();
        observed
    }

    /// Closes the atomic window: releases deferred rendezvous waiters,
    /// restores the queues, and re-enables the loop for the deferred
    /// backlog.
    fn exit_atomic(self: &Arc<Self>, sync: Option<Arc<Rendezvous>>) {
        if let Some(rendezvous) = sync {
            rendezvous.release();
        }
        let mut st = self.state.lock();
        debug_assert!(st.in_atomic, "atomic exit without an open window");
        debug!(scheduler = %self.name, "atomic window closed");
        st.in_atomic = false;
        st.atomic_work = None;
        st.swap_queues();
        self.spawn_loop_if_idle(&mut st);
    }

    /// Consumes a parked barrier once no asynchronous task is in flight.
    fn check_quiescence(self: &Arc<Self>) {
        if self.running_async.load(Ordering::SeqCst) != 0 {
            return;
        }
        let completion = {
            let mut st = self.state.lock();
            match st.waiting_barrier.take() {
                Some(barrier) => {
                    let completion = self.consume_barrier_locked(&mut st, barrier);
                    self.spawn_loop_if_idle(&mut st);
                    completion
                }
                None => None,
            }
        };
        if let Some(tx) = completion {
            let _ = tx.send(Ok(()));
        }
    }

    /// Clears the barrier and promotes deferred submissions, stopping
    /// after the next barrier marker (which re-arms the partition). The
    /// returned promise must be resolved after the lock is released.
    fn consume_barrier_locked(
        self: &Arc<Self>,
        st: &mut SchedulerState,
        barrier: Work,
    ) -> Option<CompletionSender> {
        debug!(scheduler = %self.name, deferred = st.barrier.len(), "barrier consumed");
        st.in_barrier = false;
        while let Some(deferred) = st.barrier.pop_front() {
            let hit_barrier = deferred.is_barrier();
            st.active.push_back(deferred);
            if hit_barrier {
                st.in_barrier = true;
                break;
            }
        }
        let Work { completion, .. } = barrier;
        completion
    }

    /// Owner-side rendezvous completion: every participant has arrived.
    /// Runs on whichever thread crossed the counter to zero.
    pub(crate) fn sync_ready(self: &Arc<Self>, rendezvous: &Arc<Rendezvous>) {
        // Taking the parked work, entering the atomic window, and marking
        // the protected region in flight happen in one critical section:
        // the scheduler must never look idle between unparking and the
        // start of the protected work, or the loop would interleave.
        let work = {
            let mut st = self.state.lock();
            let work = st
                .waiting_owned_sync
                .take()
                .expect("rendezvous ready without a parked owner work");
            assert!(
                work.sync.as_ref().is_some_and(|r| Arc::ptr_eq(r, rendezvous)),
                "rendezvous source mismatch on owner `{}`",
                self.name
            );
            if work.options.is_atomic() {
                assert!(
                    !st.in_atomic,
                    "atomic window already active on scheduler `{}`",
                    self.name
                );
                st.in_atomic = true;
                st.atomic_work = Some(work.id);
                st.swap_queues();
            } else {
                st.owner_sync_active = true;
            }
            work
        };
        let Work {
            id,
            options,
            payload,
            completion,
            sync,
        } = work;
        let atomic = options.is_atomic();
        let sync = sync.expect("owner work without rendezvous");
        debug!(scheduler = %self.name, atomic, "rendezvous: protected work starting");

        // For non-atomic work the waiters are released when the
        // synchronous region exits, fault or not; atomic work defers the
        // release to task completion. The guard also respawns the owner's
        // loop, which parked while waiting for the rendezvous.
        let deferred = atomic.then(|| Arc::clone(&sync));
        let _guard = SyncReadyGuard {
            core: Arc::clone(self),
            rendezvous: (!atomic).then_some(sync),
        };
        match payload {
            Payload::Action(f) => self.run_action(f),
            Payload::Task(f) => self.start_task(id, atomic, completion, deferred, move || f()),
            Payload::TaskWithToken(f, token) => {
                self.start_task(id, atomic, completion, deferred, move || f(token));
            }
            Payload::Post(_) | Payload::Barrier | Payload::SyncMark(_) => {
                unreachable!("markers cannot own a rendezvous")
            }
        }
    }

    /// Waiter-side rendezvous release: the protected region has ended.
    pub(crate) fn sync_end(self: &Arc<Self>, rendezvous: &Arc<Rendezvous>) {
        let mut st = self.state.lock();
        let parked = st
            .waiting_sync
            .take()
            .expect("rendezvous release without a parked waiter");
        assert!(
            matches!(&parked.payload, Payload::SyncMark(r) if Arc::ptr_eq(r, rendezvous)),
            "rendezvous source mismatch on waiter `{}`",
            self.name
        );
        debug!(scheduler = %self.name, "rendezvous: released");
        self.spawn_loop_if_idle(&mut st);
    }

    fn close(self: &Arc<Self>) {
        let mut cancelled: Vec<Work> = Vec::new();
        {
            let mut st = self.state.lock();
            if st.disposed {
                return;
            }
            st.disposed = true;
            debug!(scheduler = %self.name, "closing");
            let inner = &mut *st;
            drain_retaining_posts(&mut inner.active, &mut cancelled);
            drain_retaining_posts(&mut inner.pending, &mut cancelled);
            drain_retaining_posts(&mut inner.barrier, &mut cancelled);
            if let Some(barrier) = inner.waiting_barrier.take() {
                cancelled.push(barrier);
            }
        }
        // Token trips and promises resolve outside the lock: both wake
        // foreign wakers that may re-enter this scheduler.
        if let Some(source) = self.cancel.get() {
            source.cancel();
        }
        for work in cancelled {
            work.resolve_cancelled();
        }
    }

    fn report_fault(self: &Arc<Self>, err: &Error) -> bool {
        let handler = self.fault_handler.lock().clone();
        match handler {
            Some(handler) => {
                handler(
                    &Scheduler {
                        core: Arc::clone(self),
                    },
                    err,
                );
                true
            }
            None => false,
        }
    }
}

/// Retains only Post work items; everything else moves to `cancelled` for
/// promise resolution after the lock is released.
fn drain_retaining_posts(queue: &mut VecDeque<Work>, cancelled: &mut Vec<Work>) {
    let drained = std::mem::take(queue);
    for work in drained {
        if work.is_post() {
            queue.push_back(work);
        } else {
            cancelled.push(work);
        }
    }
}

/// Keeps the queue draining if a propagated user fault unwinds the run
/// loop mid-turn.
struct LoopGuard {
    core: Arc<SchedulerCore>,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        let mut st = self.core.state.lock();
        if !st.parked_in_sync() && !st.active.is_empty() {
            // The unwinding turn still owns the loop slot; hand it to a
            // fresh worker.
            let core = Arc::clone(&self.core);
            pool::spawn(move || core.run_loop());
        } else {
            st.loop_spawned = false;
        }
    }
}

/// Releases non-atomic rendezvous waiters and respawns the owner's loop
/// on every exit path from the protected region, including unwinds.
struct SyncReadyGuard {
    core: Arc<SchedulerCore>,
    rendezvous: Option<Arc<Rendezvous>>,
}

impl Drop for SyncReadyGuard {
    fn drop(&mut self) {
        if let Some(rendezvous) = self.rendezvous.take() {
            rendezvous.release();
        }
        let mut st = self.core.state.lock();
        st.owner_sync_active = false;
        self.core.spawn_loop_if_idle(&mut st);
    }
}
