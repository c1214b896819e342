//! Cross-scheduler synchronization: rendezvous open/close, mutual
//! exclusion during the protected region, and waiter release timing.

mod common;

use common::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use strand::{yield_now, InvokeOptions, Scheduler};

/// Flags the protected region; every unprotected work item asserts the
/// region is closed when it runs.
#[derive(Clone, Default)]
struct Trap {
    protected: Arc<AtomicBool>,
    violations: Arc<AtomicUsize>,
}

impl Trap {
    fn open(&self) {
        self.protected.store(true, Ordering::SeqCst);
    }

    fn close(&self) {
        self.protected.store(false, Ordering::SeqCst);
    }

    fn assert_outside(&self) {
        if self.protected.load(Ordering::SeqCst) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tripped(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }
}

#[test]
fn atomic_sync_work_excludes_both_schedulers() {
    let w1 = Scheduler::named("rdv-w1");
    let w2 = Scheduler::named("rdv-w2");
    let log = Log::new();
    let trap = Trap::default();

    {
        let log = log.clone();
        let trap = trap.clone();
        w1.invoke_async(move || async move {
            trap.assert_outside();
            log.push(1);
            yield_now().await;
            trap.assert_outside();
            log.push(-1);
            Ok(())
        })
        .expect("submit w1 task");
    }
    {
        let log = log.clone();
        let trap = trap.clone();
        w2.invoke_async(move || async move {
            trap.assert_outside();
            log.push(2);
            yield_now().await;
            trap.assert_outside();
            log.push(-2);
            Ok(())
        })
        .expect("submit w2 task");
    }

    let protected = {
        let log = log.clone();
        let trap = trap.clone();
        w1.invoke_await_with(
            move || async move {
                trap.open();
                log.push(100);
                yield_now().await;
                log.push(101);
                trap.close();
                Ok(())
            },
            InvokeOptions::atomic().sync_with([w2.clone()]),
        )
        .expect("submit sync work")
    };

    protected
        .wait_timeout(WAIT)
        .expect("protected work completes")
        .expect("protected work succeeds");
    drain(&w1);
    drain(&w2);

    let observed = log.snapshot();
    assert_eq!(observed.len(), 6, "{observed:?}");
    let at_100 = observed
        .iter()
        .position(|&v| v == 100)
        .expect("protected prefix observed");
    assert_eq!(
        observed.get(at_100 + 1),
        Some(&101),
        "the protected pair must be contiguous across both schedulers: {observed:?}"
    );
    assert_eq!(
        trap.tripped(),
        0,
        "no other work may run on either scheduler during the protected region"
    );
    w1.close();
    w2.close();
}

#[test]
fn non_atomic_sync_releases_at_first_yield() {
    let w1 = Scheduler::named("rdv-prefix-w1");
    let w2 = Scheduler::named("rdv-prefix-w2");
    let log = Log::new();
    let trap = Trap::default();

    {
        let log = log.clone();
        let trap = trap.clone();
        w2.invoke_async(move || async move {
            trap.assert_outside();
            log.push(2);
            yield_now().await;
            trap.assert_outside();
            log.push(-2);
            Ok(())
        })
        .expect("submit w2 task");
    }

    let protected = {
        let log = log.clone();
        let trap = trap.clone();
        w1.invoke_await_with(
            move || async move {
                // Protected region is the synchronous prefix only.
                trap.open();
                log.push(100);
                trap.close();
                yield_now().await;
                log.push(101);
                Ok(())
            },
            InvokeOptions::new().sync_with([w2.clone()]),
        )
        .expect("submit sync work")
    };

    protected
        .wait_timeout(WAIT)
        .expect("protected work completes")
        .expect("protected work succeeds");
    drain(&w1);
    drain(&w2);

    assert_eq!(log.len(), 4);
    assert_eq!(
        trap.tripped(),
        0,
        "w2 must stay idle only until the first yield point"
    );
    w1.close();
    w2.close();
}

#[test]
fn sync_action_holds_waiter_for_whole_action() {
    let w1 = Scheduler::named("rdv-action-w1");
    let w2 = Scheduler::named("rdv-action-w2");
    let log = Log::new();
    let trap = Trap::default();

    {
        let log = log.clone();
        let trap = trap.clone();
        w2.invoke(move || {
            trap.assert_outside();
            log.push(2);
        })
        .expect("submit w2 action");
    }

    {
        let log = log.clone();
        let trap = trap.clone();
        w1.invoke_with(
            move || {
                trap.open();
                log.push(100);
                trap.close();
            },
            InvokeOptions::new().sync_with([w2.clone()]),
        )
        .expect("submit sync action");
    }

    drain(&w1);
    drain(&w2);
    assert_eq!(log.len(), 2);
    assert_eq!(trap.tripped(), 0, "waiter ran during the protected action");
    w1.close();
    w2.close();
}

#[test]
fn rendezvous_with_two_waiters() {
    let owner = Scheduler::named("rdv-owner");
    let wa = Scheduler::named("rdv-wa");
    let wb = Scheduler::named("rdv-wb");
    let log = Log::new();
    let trap = Trap::default();

    for (i, waiter) in [(1, &wa), (2, &wb)] {
        let log = log.clone();
        let trap = trap.clone();
        waiter
            .invoke_async(move || async move {
                trap.assert_outside();
                log.push(i);
                yield_now().await;
                trap.assert_outside();
                log.push(-i);
                Ok(())
            })
            .expect("submit waiter task");
    }

    let protected = {
        let log = log.clone();
        let trap = trap.clone();
        owner
            .invoke_await_with(
                move || async move {
                    trap.open();
                    log.push(100);
                    yield_now().await;
                    log.push(101);
                    trap.close();
                    Ok(())
                },
                InvokeOptions::atomic().sync_with([wa.clone(), wb.clone()]),
            )
            .expect("submit sync work")
    };

    protected
        .wait_timeout(WAIT)
        .expect("protected work completes")
        .expect("protected work succeeds");
    drain(&owner);
    drain(&wa);
    drain(&wb);

    assert_eq!(log.len(), 6);
    assert_eq!(
        trap.tripped(),
        0,
        "no waiter may run work during the protected region"
    );
    owner.close();
    wa.close();
    wb.close();
}

#[test]
fn schedulers_resume_normal_service_after_release() {
    let w1 = Scheduler::named("rdv-resume-w1");
    let w2 = Scheduler::named("rdv-resume-w2");
    let log = Log::new();

    {
        let log = log.clone();
        w1.invoke_await_with(
            move || async move {
                log.push(100);
                Ok(())
            },
            InvokeOptions::atomic().sync_with([w2.clone()]),
        )
        .expect("submit sync work")
        .wait_timeout(WAIT)
        .expect("sync work completes")
        .expect("sync work succeeds");
    }

    let after = log.clone();
    w2.invoke(move || after.push(7)).expect("w2 accepts work again");
    drain(&w2);
    assert_eq!(log.snapshot(), vec![100, 7]);
    w1.close();
    w2.close();
}
