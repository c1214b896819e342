//! Close and cancellation: queued promises resolve cancelled, suspended
//! tasks observe the shared token and unwind, and close is idempotent.

mod common;

use common::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strand::{channel::oneshot, InvokeOptions, Scheduler};

#[test]
fn close_from_inside_a_task_cancels_its_continuation() {
    let scheduler = Scheduler::named("close-inside");
    let log = Log::new();

    let completion = {
        let log = log.clone();
        let me = scheduler.clone();
        scheduler
            .invoke_await_token(move |token| async move {
                log.push(1);
                me.close();
                // Stands in for delay(long, token): cancellation wins.
                cancellable_wait(token).await?;
                log.push(2);
                Ok(())
            })
            .expect("submit task")
    };

    let err = completion
        .wait_timeout(WAIT)
        .expect("completion resolves")
        .expect_err("the task must unwind via the shared token");
    assert!(err.is_cancelled(), "{err}");
    assert_eq!(
        log.snapshot(),
        vec![1],
        "nothing after the cancelled delay may be observed"
    );
}

#[test]
fn suspended_task_resumes_after_close_to_unwind() {
    let scheduler = Scheduler::named("close-resume");
    let started = Arc::new(AtomicBool::new(false));

    let completion = {
        let started = Arc::clone(&started);
        scheduler
            .invoke_await_token(move |token| async move {
                started.store(true, Ordering::SeqCst);
                cancellable_wait(token).await?;
                Ok(())
            })
            .expect("submit task")
    };

    wait_until(|| started.load(Ordering::SeqCst));
    scheduler.close();

    // The continuation is a Post: it must still run after close so the
    // task can observe the token and unwind.
    let err = completion
        .wait_timeout(WAIT)
        .expect("suspended task must resolve after close")
        .expect_err("token unwinding resolves as cancelled");
    assert!(err.is_cancelled(), "{err}");
}

#[test]
fn close_cancels_work_queued_behind_an_atomic_window() {
    let scheduler = Scheduler::named("close-queued");
    let started = Arc::new(AtomicBool::new(false));
    let (gate_tx, gate_rx) = oneshot::channel::<()>();

    let atomic = {
        let started = Arc::clone(&started);
        scheduler
            .invoke_await_with(
                move || async move {
                    started.store(true, Ordering::SeqCst);
                    let _ = gate_rx.await;
                    Ok(())
                },
                InvokeOptions::atomic(),
            )
            .expect("submit atomic task")
    };
    wait_until(|| started.load(Ordering::SeqCst));

    // Deferred behind the open atomic window.
    let queued = scheduler
        .invoke_await(|| async { Ok(()) })
        .expect("submit deferred task");
    let barrier = scheduler.set_barrier_await();

    scheduler.close();

    let err = queued
        .wait_timeout(WAIT)
        .expect("deferred promise resolves at close")
        .expect_err("deferred work is dropped as cancelled");
    assert!(err.is_cancelled(), "{err}");
    let err = barrier
        .wait_timeout(WAIT)
        .expect("barrier promise resolves at close")
        .expect_err("pending barrier resolves cancelled");
    assert!(err.is_cancelled(), "{err}");

    // The atomic-exit path stays intact: the in-flight task still
    // completes normally once released.
    gate_tx.send(()).expect("atomic task still listening");
    atomic
        .wait_timeout(WAIT)
        .expect("atomic completion resolves")
        .expect("in-flight atomic work is not cancelled by close");
}

#[test]
fn close_is_idempotent() {
    let scheduler = Scheduler::named("close-idempotent");
    let token = scheduler.token();
    scheduler.close();
    scheduler.close();
    scheduler.close();
    assert!(scheduler.is_closed());
    assert!(token.is_cancelled());
}

#[test]
fn submissions_after_close_are_dropped_silently() {
    let scheduler = Scheduler::named("close-late");
    let log = Log::new();
    scheduler.close();

    let late = log.clone();
    scheduler
        .invoke(move || late.push(1))
        .expect("late action is dropped, not a misuse");
    scheduler
        .invoke_async(|| async { Ok(()) })
        .expect("late task is dropped, not a misuse");
    scheduler.set_barrier();

    let completion = scheduler
        .invoke_await(|| async { Ok(()) })
        .expect("late awaitable is dropped, not a misuse");
    let err = completion
        .wait_timeout(WAIT)
        .expect("late promise resolves immediately")
        .expect_err("late promise resolves cancelled");
    assert!(err.is_cancelled(), "{err}");
    assert_eq!(log.len(), 0, "no late work may execute");
}

#[test]
fn completions_resolve_exactly_once() {
    let scheduler = Scheduler::named("close-once");
    let completion = scheduler
        .invoke_await(|| async { Ok(()) })
        .expect("submit task");
    completion
        .wait_timeout(WAIT)
        .expect("completion resolves")
        .expect("task succeeded");
    // Closing afterwards must not disturb already-resolved promises.
    scheduler.close();
}
