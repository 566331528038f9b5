//! Deferred combinators
//!
//! Stateless functions composing deferreds: `resolve`, `reject`, `all`,
//! `all_settled`, `race` and `any`. Every input goes through [`resolve`]
//! first, so plain values, deferreds and foreign thenables mix freely.
//!
//! None of these cancel their inputs. Once the aggregate has settled, later
//! input settlements are still observed and simply have no effect.

use super::promise::Deferred;
use super::value::{Resolution, Settlement};
use crate::event_loop::Scheduler;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Rejection reason of [`any`] when every input rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("AggregateError: all {} inputs were rejected", .errors.len())]
pub struct AggregateError<E> {
    /// Rejection reasons, index-aligned to the inputs
    pub errors: Vec<E>,
}

/// Wrap anything resolvable in a deferred. A deferred of this
/// implementation is returned unchanged.
pub fn resolve<T, E>(scheduler: &Scheduler, item: impl Into<Resolution<T, E>>) -> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    match item.into() {
        Resolution::Deferred(deferred) => deferred,
        other => {
            let (deferred, resolver) = Deferred::pending(scheduler);
            resolver.resolve(other);
            deferred
        }
    }
}

/// A deferred already rejected with `reason`
pub fn reject<T, E>(scheduler: &Scheduler, reason: E) -> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
{
    Deferred::rejected(scheduler, reason)
}

fn resolve_all<T, E, I>(scheduler: &Scheduler, items: I) -> Vec<Deferred<T, E>>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
    I: IntoIterator,
    I::Item: Into<Resolution<T, E>>,
{
    items.into_iter().map(|item| resolve(scheduler, item)).collect()
}

/// Fulfils with every value, in input order, once all inputs fulfil.
/// Rejects with the first rejection to arrive.
pub fn all<T, E, I>(scheduler: &Scheduler, items: I) -> Deferred<Vec<T>, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
    I: IntoIterator,
    I::Item: Into<Resolution<T, E>>,
{
    let inputs = resolve_all(scheduler, items);
    let (aggregate, resolver) = Deferred::pending(scheduler);
    if inputs.is_empty() {
        resolver.fulfill(Vec::new());
        return aggregate;
    }

    let slots: Rc<RefCell<Vec<Option<T>>>> = Rc::new(RefCell::new(vec![None; inputs.len()]));
    let remaining = Rc::new(Cell::new(inputs.len()));

    for (index, input) in inputs.iter().enumerate() {
        let slots = Rc::clone(&slots);
        let remaining = Rc::clone(&remaining);
        let on_success = resolver.clone();
        let on_failure = resolver.clone();
        input.subscribe_into(
            &resolver,
            move |value| {
                slots.borrow_mut()[index] = Some(value);
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 {
                    let values = slots.borrow_mut().drain(..).flatten().collect();
                    on_success.fulfill(values);
                }
            },
            move |reason| on_failure.reject(reason),
        );
    }
    aggregate
}

/// Fulfils, never rejects, with one [`Settlement`] per input in input order
/// once every input has settled.
pub fn all_settled<T, E, I>(scheduler: &Scheduler, items: I) -> Deferred<Vec<Settlement<T, E>>, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
    I: IntoIterator,
    I::Item: Into<Resolution<T, E>>,
{
    let inputs = resolve_all(scheduler, items);
    let (aggregate, resolver) = Deferred::pending(scheduler);
    if inputs.is_empty() {
        resolver.fulfill(Vec::new());
        return aggregate;
    }

    let slots: Rc<RefCell<Vec<Option<Settlement<T, E>>>>> =
        Rc::new(RefCell::new(vec![None; inputs.len()]));
    let remaining = Rc::new(Cell::new(inputs.len()));

    let record = {
        let resolver = resolver.clone();
        move |index: usize, outcome: Settlement<T, E>| {
            slots.borrow_mut()[index] = Some(outcome);
            remaining.set(remaining.get() - 1);
            if remaining.get() == 0 {
                let outcomes = slots.borrow_mut().drain(..).flatten().collect();
                resolver.fulfill(outcomes);
            }
        }
    };
    let record = Rc::new(record);

    for (index, input) in inputs.iter().enumerate() {
        let on_success = Rc::clone(&record);
        let on_failure = Rc::clone(&record);
        input.subscribe_into(
            &resolver,
            move |value| on_success(index, Settlement::Fulfilled { value }),
            move |reason| on_failure(index, Settlement::Rejected { reason }),
        );
    }
    aggregate
}

/// Settles like whichever input settles first. An empty input never settles.
pub fn race<T, E, I>(scheduler: &Scheduler, items: I) -> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
    I: IntoIterator,
    I::Item: Into<Resolution<T, E>>,
{
    let inputs = resolve_all(scheduler, items);
    let (aggregate, resolver) = Deferred::pending(scheduler);
    for input in &inputs {
        let on_success = resolver.clone();
        let on_failure = resolver.clone();
        input.subscribe_into(
            &resolver,
            move |value| on_success.fulfill(value),
            move |reason| on_failure.reject(reason),
        );
    }
    aggregate
}

/// Fulfils with the first fulfilment. If every input rejects, rejects with
/// an [`AggregateError`] of all reasons in input order; an empty input
/// rejects immediately.
pub fn any<T, E, I>(scheduler: &Scheduler, items: I) -> Deferred<T, AggregateError<E>>
where
    T: Clone + 'static,
    E: Clone + fmt::Debug + 'static,
    I: IntoIterator,
    I::Item: Into<Resolution<T, E>>,
{
    let inputs = resolve_all(scheduler, items);
    let (aggregate, resolver) = Deferred::pending(scheduler);
    if inputs.is_empty() {
        resolver.reject(AggregateError { errors: Vec::new() });
        return aggregate;
    }

    let errors: Rc<RefCell<Vec<Option<E>>>> = Rc::new(RefCell::new(vec![None; inputs.len()]));
    let remaining = Rc::new(Cell::new(inputs.len()));

    for (index, input) in inputs.iter().enumerate() {
        let errors = Rc::clone(&errors);
        let remaining = Rc::clone(&remaining);
        let on_success = resolver.clone();
        let on_failure = resolver.clone();
        input.subscribe_into(
            &resolver,
            move |value| on_success.fulfill(value),
            move |reason| {
                errors.borrow_mut()[index] = Some(reason);
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 {
                    let errors = errors.borrow_mut().drain(..).flatten().collect();
                    on_failure.reject(AggregateError { errors });
                }
            },
        );
    }
    aggregate
}
