//! Prelude module for convenient imports
//!
//! ```
//! use deferred::prelude::*;
//!
//! let event_loop = EventLoop::new();
//! let d: Deferred<u8, String> = Deferred::resolved(&event_loop.scheduler(), 1);
//! event_loop.run_until_idle().unwrap();
//! assert_eq!(d.state(), State::Fulfilled);
//! ```

// Deferred values
pub use crate::runtime::{
    Deferred, DeferredId, OnFailure, OnSuccess, Outcome, Resolution, Resolver, Settlement, State,
    Thenable,
};

// Combinators
pub use crate::runtime::{all, all_settled, any, race, reject, resolve, AggregateError};

// Scheduling
pub use crate::event_loop::{EventLoop, EventLoopConfig, Schedule, Scheduler, UnhandledRejection};

// Error handling
pub use crate::error::{Error, Result};
