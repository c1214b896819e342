//! Strand: serialized, cooperatively interleaved work scheduling.
//!
//! A [`Scheduler`] accepts synchronous actions and asynchronous tasks and
//! executes them as a logical single-threaded domain: no two work items
//! ever run their synchronous code concurrently on one scheduler, yet a
//! task that suspends at a yield point releases the scheduler so later
//! submissions can start before it resumes. Three primitives compose on
//! top:
//!
//! - **Atomic** tasks run with no interleaving at all until they complete
//! - **Barriers** partition earlier submissions from later ones
//! - **Cross-scheduler sync** holds one or more other schedulers idle for
//!   the duration of one work item's protected region
//!
//! Run loops execute on a shared background worker pool; schedulers are
//! cheap-clone handles that can be submitted to from any thread.
//!
//! # Example
//!
//! ```
//! use strand::{yield_now, Scheduler};
//!
//! let scheduler = Scheduler::named("example");
//! let done = scheduler
//!     .invoke_await(|| async {
//!         yield_now().await;
//!         Ok(())
//!     })
//!     .expect("submission accepted");
//! done.wait().expect("task ran to completion");
//! scheduler.close();
//! ```

pub mod cancel;
pub mod channel;
pub mod config;
pub mod error;
mod pool;
pub mod scheduler;

pub use cancel::{CancelSource, CancelToken};
pub use error::{Error, ErrorKind, Result};
pub use scheduler::{yield_now, Completion, InvokeOptions, Scheduler, YieldNow};
