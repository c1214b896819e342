//! Channel primitives used by the scheduler.
//!
//! Only the [`oneshot`] completion channel lives here: it backs the
//! promises carried by awaitable submissions and barrier markers.

pub mod oneshot;
