//! Deferred values and the combinators built on them
//!
//! The plain data types live next to the [`Thenable`] interop seam,
//! [`Deferred`] owns settlement and reaction scheduling, and the free
//! functions re-exported here compose deferreds.

mod combinators;
mod promise;
mod value;

pub use combinators::{all, all_settled, any, race, reject, resolve, AggregateError};
pub use promise::{Deferred, Resolver};
pub use value::{DeferredId, OnFailure, OnSuccess, Outcome, Resolution, Settlement, State, Thenable};
