//! Deferred: single-threaded Promise/A+ deferred values for Rust
//!
//! A [`Deferred`] is a value that is pending now and settles later, exactly
//! once, as either fulfilled or rejected. Callbacks registered with
//! [`then`](Deferred::then) and friends never run inline: they are handed to
//! a [`Scheduler`] and run in registration order once the current
//! synchronous code has finished.
//!
//! # Quick Start
//!
//! ```
//! use deferred::{Deferred, EventLoop, Resolution, Settlement};
//!
//! fn main() -> deferred::Result<()> {
//!     let event_loop = EventLoop::new();
//!     let scheduler = event_loop.scheduler();
//!
//!     let items: Vec<Deferred<i32, String>> = vec![
//!         Deferred::resolved(&scheduler, 1),
//!         Deferred::resolved(&scheduler, 2),
//!     ];
//!     let sum = deferred::all(&scheduler, items)
//!         .and_then(|values| Ok(Resolution::Value(values.iter().sum::<i32>())));
//!
//!     event_loop.run_until_idle()?;
//!     assert_eq!(sum.outcome(), Some(Settlement::Fulfilled { value: 3 }));
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`runtime`] | [`Deferred`], [`Resolver`], [`Thenable`], combinators |
//! | [`event_loop`] | [`Schedule`] capability, [`EventLoop`] with virtual timers |
//! | [`prelude`] | Everything above in one import |
// Clippy configuration.
//
// - type_complexity: reaction queues store boxed trait objects behind Rc<RefCell>
#![allow(clippy::type_complexity)]

pub mod event_loop;
pub mod prelude;
pub mod runtime;

mod error;

pub use error::{ConfigErrorKind, Error, Result};
pub use event_loop::{
    EventLoop, EventLoopConfig, EventLoopStats, RunResult, Schedule, Scheduler, Task, TimerId,
    UnhandledRejection,
};
pub use runtime::{
    all, all_settled, any, race, reject, resolve, AggregateError, Deferred, DeferredId, OnFailure,
    OnSuccess, Outcome, Resolution, Resolver, Settlement, State, Thenable,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
