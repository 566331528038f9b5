//! Deferred Implementation
//!
//! This module provides a Promise/A+ style deferred value. Settling is
//! synchronous; reaction callbacks always run later, through the deferred's
//! [`Scheduler`], in the order they were registered.
//!
//! Ownership only flows downstream: a deferred owns its queued reactions,
//! and each reaction owns the [`Resolver`] of the deferred `then` returned.
//! Nothing points back upstream, so chains never form reference cycles.
//! Dropping the last handle to a pending deferred tears its chain down
//! with an explicit work stack, so chain length is not bounded by the
//! native stack.

use super::value::{
    Adoption, DeferredId, OnFailure, OnSuccess, Outcome, Resolution, Settlement, State, Thenable,
};
use crate::event_loop::{Scheduler, UnhandledRejection};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Internal deferred state
struct Inner<T, E> {
    id: DeferredId,
    /// `None` while pending; written exactly once
    outcome: Option<Settlement<T, E>>,
    /// Reactions waiting for this deferred to settle, in registration order
    reactions: Vec<Box<dyn Job<T, E>>>,
    /// A resolver call has been accepted; later resolver calls are ignored
    locked: bool,
    /// Whether any reaction was ever registered (for unhandled rejection tracking)
    handled: bool,
    /// Whether this rejection was reported to the scheduler as unhandled
    reported: bool,
    scheduler: Scheduler,
}

/// Work queued on a deferred, run with its outcome once it settles
trait Job<T, E> {
    fn run(self: Box<Self>, outcome: Settlement<T, E>);

    /// Drop the job without running it, handing the deferred it feeds (if
    /// any) to `pending` instead of dropping that inline.
    fn detach(self: Box<Self>, pending: &mut Vec<Box<dyn Detach>>);
}

/// A type-erased deferred handle awaiting teardown
trait Detach {
    fn detach(self: Box<Self>, pending: &mut Vec<Box<dyn Detach>>);
}

impl<T: 'static, E: 'static> Detach for Deferred<T, E> {
    fn detach(self: Box<Self>, pending: &mut Vec<Box<dyn Detach>>) {
        if Rc::strong_count(&self.inner) != 1 {
            return;
        }
        let reactions = match self.inner.try_borrow_mut() {
            Ok(mut inner) => std::mem::take(&mut inner.reactions),
            Err(_) => return,
        };
        for job in reactions {
            job.detach(pending);
        }
    }
}

impl<T, E> Drop for Inner<T, E> {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        for job in std::mem::take(&mut self.reactions) {
            job.detach(&mut pending);
        }
        while let Some(next) = pending.pop() {
            next.detach(&mut pending);
        }
    }
}

/// One side of a reaction
enum Callback<A, U, E> {
    /// A user callback; its return value or error feeds downstream
    Handler(Box<dyn FnOnce(A) -> Outcome<U, E>>),
    /// No callback registered; the argument flows downstream unchanged
    Absent(fn(A) -> Settlement<U, E>),
}

impl<A, U: Clone + 'static, E: Clone + fmt::Debug + 'static> Callback<A, U, E> {
    fn invoke(self, argument: A, downstream: &Resolver<U, E>) {
        match self {
            Callback::Handler(handler) => match handler(argument) {
                Ok(resolution) => downstream.resolve(resolution),
                Err(reason) => downstream.reject(reason),
            },
            Callback::Absent(forward) => match forward(argument) {
                Settlement::Fulfilled { value } => downstream.fulfill(value),
                Settlement::Rejected { reason } => downstream.reject(reason),
            },
        }
    }
}

fn forward_value<T, E>(value: T) -> Settlement<T, E> {
    Settlement::Fulfilled { value }
}

fn forward_reason<U, E>(reason: E) -> Settlement<U, E> {
    Settlement::Rejected { reason }
}

/// A registered pair of callbacks plus the deferred they feed
struct Reaction<T, U, E> {
    on_success: Callback<T, U, E>,
    on_failure: Callback<E, U, E>,
    downstream: Resolver<U, E>,
}

impl<T, U, E> Job<T, E> for Reaction<T, U, E>
where
    U: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    fn run(self: Box<Self>, outcome: Settlement<T, E>) {
        let Reaction {
            on_success,
            on_failure,
            downstream,
        } = *self;
        match outcome {
            Settlement::Fulfilled { value } => on_success.invoke(value, &downstream),
            Settlement::Rejected { reason } => on_failure.invoke(reason, &downstream),
        }
    }

    fn detach(self: Box<Self>, pending: &mut Vec<Box<dyn Detach>>) {
        let Reaction {
            on_success,
            on_failure,
            downstream,
        } = *self;
        drop((on_success, on_failure));
        pending.push(Box::new(downstream.deferred));
    }
}

/// Raw callback pair; used by the combinators and by foreign adopters.
/// `downstream` is the deferred the callbacks settle, when known.
struct Subscription<S, F> {
    on_success: S,
    on_failure: F,
    downstream: Option<Box<dyn Detach>>,
}

impl<T, E, S, F> Job<T, E> for Subscription<S, F>
where
    S: FnOnce(T),
    F: FnOnce(E),
{
    fn run(self: Box<Self>, outcome: Settlement<T, E>) {
        match outcome {
            Settlement::Fulfilled { value } => (self.on_success)(value),
            Settlement::Rejected { reason } => (self.on_failure)(reason),
        }
    }

    fn detach(self: Box<Self>, pending: &mut Vec<Box<dyn Detach>>) {
        let Subscription {
            on_success,
            on_failure,
            downstream,
        } = *self;
        // The callbacks hold their own handles; release those first so the
        // strong count seen at teardown is accurate.
        drop((on_success, on_failure));
        pending.extend(downstream);
    }
}

/// A deferred adopting the outcome of one of this implementation
struct Follow<T, E> {
    target: Deferred<T, E>,
}

impl<T, E> Job<T, E> for Follow<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    fn run(self: Box<Self>, outcome: Settlement<T, E>) {
        self.target.settle(outcome);
    }

    fn detach(self: Box<Self>, pending: &mut Vec<Box<dyn Detach>>) {
        pending.push(Box::new(self.target));
    }
}

/// A deferred value: the eventual outcome of an operation.
///
/// Cloning shares the same underlying state; every clone observes the same
/// single settlement.
pub struct Deferred<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

/// Capability to settle one deferred.
///
/// The first accepted call wins. Resolving with something adoptable locks
/// the deferred in to that thenable's eventual outcome; further calls on
/// any clone of the resolver are ignored.
pub struct Resolver<T, E> {
    deferred: Deferred<T, E>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            deferred: self.deferred.clone(),
        }
    }
}

impl<T, E> Deferred<T, E> {
    /// Identity used in logs and rejection reports
    pub fn id(&self) -> DeferredId {
        self.inner.borrow().id
    }

    /// Current state; a deferred locked in to an adopted thenable is still pending
    pub fn state(&self) -> State {
        match &self.inner.borrow().outcome {
            Some(outcome) => outcome.state(),
            None => State::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.inner.borrow().outcome.is_none()
    }

    /// Whether both handles refer to the same deferred
    pub fn ptr_eq(&self, other: &Deferred<T, E>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The scheduler reactions on this deferred run on
    pub fn scheduler(&self) -> Scheduler {
        self.inner.borrow().scheduler.clone()
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    /// Create a pending deferred together with its resolver
    pub fn pending(scheduler: &Scheduler) -> (Self, Resolver<T, E>) {
        let deferred = Self {
            inner: Rc::new(RefCell::new(Inner {
                id: DeferredId::next(),
                outcome: None,
                reactions: Vec::new(),
                locked: false,
                handled: false,
                reported: false,
                scheduler: scheduler.clone(),
            })),
        };
        let resolver = Resolver {
            deferred: deferred.clone(),
        };
        (deferred, resolver)
    }

    /// Create a deferred and run `executor` synchronously with its resolver.
    ///
    /// An `Err` returned by the executor rejects the deferred, unless the
    /// executor already settled or locked it.
    ///
    /// ```
    /// use deferred::{Deferred, EventLoop, Settlement};
    ///
    /// let event_loop = EventLoop::new();
    /// let d: Deferred<i32, String> = Deferred::new(&event_loop.scheduler(), |resolver| {
    ///     resolver.fulfill(123);
    ///     Ok(())
    /// });
    /// let next = d.map(|v| v + 1);
    /// event_loop.run_until_idle().unwrap();
    /// assert_eq!(next.outcome(), Some(Settlement::Fulfilled { value: 124 }));
    /// ```
    pub fn new<X>(scheduler: &Scheduler, executor: X) -> Self
    where
        X: FnOnce(Resolver<T, E>) -> Result<(), E>,
    {
        let (deferred, resolver) = Self::pending(scheduler);
        if let Err(reason) = executor(resolver.clone()) {
            debug!(id = %deferred.id(), reason = ?reason, "executor failed");
            resolver.reject(reason);
        }
        deferred
    }

    /// A deferred already fulfilled with `value`
    pub fn resolved(scheduler: &Scheduler, value: T) -> Self {
        let (deferred, resolver) = Self::pending(scheduler);
        resolver.fulfill(value);
        deferred
    }

    /// A deferred already rejected with `reason`
    pub fn rejected(scheduler: &Scheduler, reason: E) -> Self {
        let (deferred, resolver) = Self::pending(scheduler);
        resolver.reject(reason);
        deferred
    }

    /// Final outcome, if settled
    pub fn outcome(&self) -> Option<Settlement<T, E>> {
        self.inner.borrow().outcome.clone()
    }

    /// Register both callbacks. The returned deferred settles with whatever
    /// the invoked callback returns (adopting thenables) or rejects with its
    /// error.
    pub fn then<U, S, F>(&self, on_success: S, on_failure: F) -> Deferred<U, E>
    where
        U: Clone + 'static,
        S: FnOnce(T) -> Outcome<U, E> + 'static,
        F: FnOnce(E) -> Outcome<U, E> + 'static,
    {
        self.react::<U>(
            Callback::Handler(Box::new(on_success)),
            Callback::Handler(Box::new(on_failure)),
        )
    }

    /// `then` without a failure callback: rejections pass through unchanged
    pub fn and_then<U, S>(&self, on_success: S) -> Deferred<U, E>
    where
        U: Clone + 'static,
        S: FnOnce(T) -> Outcome<U, E> + 'static,
    {
        self.react::<U>(Callback::Handler(Box::new(on_success)), Callback::Absent(forward_reason))
    }

    /// Transform the fulfilled value with an infallible function
    pub fn map<U, M>(&self, f: M) -> Deferred<U, E>
    where
        U: Clone + 'static,
        M: FnOnce(T) -> U + 'static,
    {
        self.and_then(move |value| Ok(Resolution::Value(f(value))))
    }

    /// `then` without a success callback: values pass through unchanged
    pub fn catch<F>(&self, on_failure: F) -> Deferred<T, E>
    where
        F: FnOnce(E) -> Outcome<T, E> + 'static,
    {
        self.react::<T>(Callback::Absent(forward_value), Callback::Handler(Box::new(on_failure)))
    }

    /// `then` with neither callback: a new deferred mirroring this one
    pub fn forward(&self) -> Deferred<T, E> {
        self.react::<T>(Callback::Absent(forward_value), Callback::Absent(forward_reason))
    }

    /// Run `on_settled` once whatever the outcome, without altering it.
    /// An `Err` from `on_settled` replaces the outcome with that rejection.
    pub fn finally<F>(&self, on_settled: F) -> Deferred<T, E>
    where
        F: FnOnce() -> Result<(), E> + 'static,
    {
        let slot = Rc::new(Cell::new(Some(on_settled)));
        let on_failure_slot = Rc::clone(&slot);
        self.then(
            move |value| {
                if let Some(f) = slot.take() {
                    f()?;
                }
                Ok(Resolution::Value(value))
            },
            move |reason| {
                if let Some(f) = on_failure_slot.take() {
                    f()?;
                }
                Err(reason)
            },
        )
    }

    fn react<U>(&self, on_success: Callback<T, U, E>, on_failure: Callback<E, U, E>) -> Deferred<U, E>
    where
        U: Clone + 'static,
    {
        let (downstream, resolver) = Deferred::pending(&self.scheduler());
        self.enqueue(Box::new(Reaction {
            on_success,
            on_failure,
            downstream: resolver,
        }));
        downstream
    }

    /// Register raw callbacks without creating a downstream deferred
    pub(crate) fn subscribe<S, F>(&self, on_success: S, on_failure: F)
    where
        S: FnOnce(T) + 'static,
        F: FnOnce(E) + 'static,
    {
        self.enqueue(Box::new(Subscription {
            on_success,
            on_failure,
            downstream: None,
        }));
    }

    /// [`subscribe`](Self::subscribe) for callbacks that settle `downstream`
    pub(crate) fn subscribe_into<U, X, S, F>(&self, downstream: &Resolver<U, X>, on_success: S, on_failure: F)
    where
        U: 'static,
        X: 'static,
        S: FnOnce(T) + 'static,
        F: FnOnce(E) + 'static,
    {
        self.enqueue(Box::new(Subscription {
            on_success,
            on_failure,
            downstream: Some(Box::new(downstream.deferred.clone())),
        }));
    }

    /// Queue a job, or schedule it right away if already settled.
    /// Never runs it inline.
    fn enqueue(&self, job: Box<dyn Job<T, E>>) {
        let (settled, scheduler, id, revoke) = {
            let mut inner = self.inner.borrow_mut();
            inner.handled = true;
            let revoke = std::mem::take(&mut inner.reported);
            (inner.outcome.clone(), inner.scheduler.clone(), inner.id, revoke)
        };

        match settled {
            None => self.inner.borrow_mut().reactions.push(job),
            Some(outcome) => scheduler.schedule(move || job.run(outcome)),
        }
        if revoke {
            scheduler.revoke_unhandled_rejection(id);
        }
    }

    /// Resolve, bypassing the resolver lock. Plain values settle; anything
    /// adoptable is subscribed to and its outcome adopted, recursively.
    fn adopt(&self, resolution: Resolution<T, E>) {
        if let Resolution::Deferred(other) = &resolution {
            if other.ptr_eq(self) {
                warn!(id = %self.id(), "deferred resolved with itself; ignoring");
                return;
            }
        }

        let thenable = match resolution.into_adoption() {
            Adoption::Plain(value) => return self.settle(Settlement::Fulfilled { value }),
            Adoption::Follow(other) => {
                trace!(id = %self.id(), source = %other.id(), "following deferred");
                return other.enqueue(Box::new(Follow { target: self.clone() }));
            }
            Adoption::Adopt(thenable) => thenable,
        };
        trace!(id = %self.id(), "adopting thenable");

        // Only the first callback a thenable fires counts.
        let called = Rc::new(Cell::new(false));
        let on_success: OnSuccess<T, E> = {
            let this = self.clone();
            let called = Rc::clone(&called);
            Box::new(move |next| {
                if !called.replace(true) {
                    this.adopt(next);
                }
            })
        };
        let on_failure: OnFailure<E> = {
            let this = self.clone();
            let called = Rc::clone(&called);
            Box::new(move |reason| {
                if !called.replace(true) {
                    this.settle(Settlement::Rejected { reason });
                }
            })
        };

        if let Err(reason) = thenable.then(on_success, on_failure) {
            if !called.replace(true) {
                debug!(id = %self.id(), reason = ?reason, "thenable failed to subscribe");
                self.settle(Settlement::Rejected { reason });
            }
        }
    }

    /// The one-time transition out of Pending. Drains the reaction queue
    /// into the scheduler in registration order.
    fn settle(&self, outcome: Settlement<T, E>) {
        let (reactions, scheduler, check_unhandled) = {
            let mut inner = self.inner.borrow_mut();
            if inner.outcome.is_some() {
                return;
            }
            inner.outcome = Some(outcome.clone());
            inner.locked = true;
            (
                std::mem::take(&mut inner.reactions),
                inner.scheduler.clone(),
                !inner.handled && outcome.is_rejected(),
            )
        };
        trace!(id = %self.id(), state = ?outcome.state(), reactions = reactions.len(), "settled");

        for job in reactions {
            let outcome = outcome.clone();
            scheduler.schedule(move || job.run(outcome));
        }

        if check_unhandled {
            let this = self.clone();
            scheduler.schedule(move || this.check_unhandled());
        }
    }

    /// Runs one scheduler turn after a rejection with no reactions attached
    fn check_unhandled(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.handled {
            return;
        }
        let reason = match &inner.outcome {
            Some(Settlement::Rejected { reason }) => format!("{:?}", reason),
            _ => return,
        };
        inner.reported = true;
        let report = UnhandledRejection { id: inner.id, reason };
        let scheduler = inner.scheduler.clone();
        drop(inner);
        scheduler.report_unhandled_rejection(report);
    }

    /// Take the resolver lock; false if already settled or locked
    fn lock(&self) -> bool {
        let mut inner = self.inner.borrow_mut();
        if inner.locked || inner.outcome.is_some() {
            return false;
        }
        inner.locked = true;
        true
    }
}

impl<T, E> Thenable<T, E> for Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    fn then(&self, on_success: OnSuccess<T, E>, on_failure: OnFailure<E>) -> Result<(), E> {
        self.subscribe(move |value| on_success(Resolution::Value(value)), on_failure);
        Ok(())
    }
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Deferred")
            .field("id", &inner.id)
            .field("state", &inner.outcome.as_ref().map_or(State::Pending, Settlement::state))
            .field("reactions", &inner.reactions.len())
            .finish()
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    /// Settle successfully: fulfil with a plain value, or adopt a thenable
    pub fn resolve(&self, resolution: Resolution<T, E>) {
        if self.deferred.lock() {
            self.deferred.adopt(resolution);
        } else {
            trace!(id = %self.deferred.id(), "resolve ignored; already resolved");
        }
    }

    /// Settle successfully with a plain value
    pub fn fulfill(&self, value: T) {
        self.resolve(Resolution::Value(value));
    }

    /// Settle with a failure reason
    pub fn reject(&self, reason: E) {
        if self.deferred.lock() {
            self.deferred.settle(Settlement::Rejected { reason });
        } else {
            trace!(id = %self.deferred.id(), "reject ignored; already resolved");
        }
    }

    /// The deferred this resolver settles
    pub fn deferred(&self) -> Deferred<T, E> {
        self.deferred.clone()
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").field("deferred", &self.deferred).finish()
    }
}
