//! Scheduler capability consumed by every deferred
//!
//! A deferred never runs reaction callbacks inline. It hands them to a
//! [`Schedule`] implementation, which must run each task after the current
//! synchronous code unwinds and in FIFO order relative to every other task.
//! [`EventLoop`](super::EventLoop) is the implementation shipped with the
//! crate; hosts with their own microtask primitive implement the trait.

use crate::runtime::DeferredId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

/// A unit of deferred work
pub type Task = Box<dyn FnOnce()>;

/// A rejection nobody had registered a handler for by the time its check ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnhandledRejection {
    /// The rejected deferred
    pub id: DeferredId,
    /// Debug rendering of the rejection reason
    pub reason: String,
}

/// The scheduling primitive.
pub trait Schedule {
    /// Queue `task` to run after the current synchronous execution, after
    /// every previously scheduled task.
    fn schedule(&self, task: Task);

    /// Host hook for a rejection that went unobserved through one scheduler
    /// turn. The default only logs it.
    fn report_unhandled_rejection(&self, rejection: UnhandledRejection) {
        tracing::warn!(id = %rejection.id, reason = %rejection.reason, "unhandled rejection");
    }

    /// A previously reported rejection got a handler after all.
    fn revoke_unhandled_rejection(&self, _id: DeferredId) {}
}

/// Cheap, cloneable handle to a [`Schedule`] implementation
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<dyn Schedule>,
}

impl Scheduler {
    /// Wrap a scheduler implementation
    pub fn new(schedule: impl Schedule + 'static) -> Self {
        Self {
            inner: Rc::new(schedule),
        }
    }

    /// Wrap an already shared scheduler implementation
    pub fn from_rc(inner: Rc<dyn Schedule>) -> Self {
        Self { inner }
    }

    /// Queue a callback
    pub fn schedule(&self, task: impl FnOnce() + 'static) {
        self.inner.schedule(Box::new(task));
    }

    pub(crate) fn report_unhandled_rejection(&self, rejection: UnhandledRejection) {
        self.inner.report_unhandled_rejection(rejection);
    }

    pub(crate) fn revoke_unhandled_rejection(&self, id: DeferredId) {
        self.inner.revoke_unhandled_rejection(id);
    }

    /// Whether two handles drive the same scheduler
    pub fn ptr_eq(&self, other: &Scheduler) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler").finish_non_exhaustive()
    }
}
