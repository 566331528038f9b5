//! Event Loop Implementation
//!
//! This module provides the host side of the deferred runtime: a FIFO
//! microtask queue that implements [`Schedule`], plus virtual-time timers
//! (macrotasks) for operations that settle "later", following the HTML5
//! event loop model of draining all microtasks before each macrotask.

mod config;
mod scheduler;

pub use config::{EventLoopConfig, DEFAULT_MAX_TIMER_DELAY_MS, DEFAULT_MICROTASK_BUDGET};
pub use scheduler::{Schedule, Scheduler, Task, UnhandledRejection};

use crate::error::{Error, Result};
use crate::runtime::DeferredId;
use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// Identifier returned by [`EventLoop::set_timeout`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerId(u64);

/// A macrotask to be executed once virtual time reaches `fire_at`
struct Macrotask {
    /// The callback to execute
    callback: Task,
    /// When the task should fire (virtual time in ms)
    fire_at: u64,
}

/// Result of running the event loop via [`EventLoop::run_until_idle`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    /// Total number of microtasks that were dequeued and processed
    pub microtasks_processed: usize,
    /// Total number of macrotasks that were dequeued and processed
    pub macrotasks_processed: usize,
    /// The virtual time when the event loop finished
    pub final_time: u64,
}

/// Runtime statistics for the event loop
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLoopStats {
    /// Total microtasks processed across all checkpoints
    pub total_microtasks: u64,
    /// Total macrotasks processed
    pub total_macrotasks: u64,
    /// Total microtask checkpoints run
    pub total_checkpoints: u64,
    /// Maximum microtasks drained in a single checkpoint
    pub max_microtasks_per_checkpoint: u64,
    /// Total unhandled rejections reported by deferreds
    pub unhandled_rejections_reported: u64,
    /// Reports later withdrawn because a handler was attached
    pub unhandled_rejections_revoked: u64,
}

struct LoopState {
    /// Microtask queue (deferred reactions, queued callbacks)
    microtasks: VecDeque<Task>,
    /// Pending timers
    timers: HashMap<TimerId, Macrotask>,
    /// Current virtual time in milliseconds
    virtual_time: u64,
    /// Next timer ID
    next_timer_id: u64,
    /// Reported, not yet drained or revoked, unhandled rejections
    unhandled_rejections: Vec<UnhandledRejection>,
    stats: EventLoopStats,
    config: EventLoopConfig,
}

/// Shared part of the loop; this is what deferreds hold as their scheduler
struct Shared {
    state: RefCell<LoopState>,
}

impl Schedule for Shared {
    fn schedule(&self, task: Task) {
        self.state.borrow_mut().microtasks.push_back(task);
    }

    fn report_unhandled_rejection(&self, rejection: UnhandledRejection) {
        warn!(id = %rejection.id, reason = %rejection.reason, "unhandled rejection");
        let mut state = self.state.borrow_mut();
        state.stats.unhandled_rejections_reported += 1;
        if state.config.track_unhandled_rejections {
            state.unhandled_rejections.push(rejection);
        }
    }

    fn revoke_unhandled_rejection(&self, id: DeferredId) {
        debug!(id = %id, "rejection handled after report");
        let mut state = self.state.borrow_mut();
        state.stats.unhandled_rejections_revoked += 1;
        state.unhandled_rejections.retain(|r| r.id != id);
    }
}

/// The event loop manages task queues and execution order.
///
/// Cloning yields another handle to the same loop, so it can be moved into
/// executors that schedule timers.
#[derive(Clone)]
pub struct EventLoop {
    shared: Rc<Shared>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    /// Create a new event loop with default configuration
    pub fn new() -> Self {
        Self::with_config(EventLoopConfig::default())
    }

    /// Create a new event loop with custom configuration
    pub fn with_config(config: EventLoopConfig) -> Self {
        Self {
            shared: Rc::new(Shared {
                state: RefCell::new(LoopState {
                    microtasks: VecDeque::new(),
                    timers: HashMap::default(),
                    virtual_time: 0,
                    next_timer_id: 1,
                    unhandled_rejections: Vec::new(),
                    stats: EventLoopStats::default(),
                    config,
                }),
            }),
        }
    }

    /// Scheduler handle feeding this loop's microtask queue
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::from_rc(self.shared.clone())
    }

    /// Active configuration
    pub fn config(&self) -> EventLoopConfig {
        self.shared.state.borrow().config.clone()
    }

    /// Get current virtual time
    pub fn current_time(&self) -> u64 {
        self.shared.state.borrow().virtual_time
    }

    /// Enqueue a plain microtask (`queueMicrotask`)
    pub fn queue_microtask(&self, callback: impl FnOnce() + 'static) {
        self.shared.schedule(Box::new(callback));
    }

    /// Schedule `callback` to run `delay_ms` of virtual time from now
    pub fn set_timeout(&self, delay_ms: u64, callback: impl FnOnce() + 'static) -> TimerId {
        let mut state = self.shared.state.borrow_mut();
        let id = TimerId(state.next_timer_id);
        state.next_timer_id += 1;

        let delay = delay_ms.min(state.config.max_timer_delay_ms);
        let fire_at = state.virtual_time.saturating_add(delay);
        state.timers.insert(
            id,
            Macrotask {
                callback: Box::new(callback),
                fire_at,
            },
        );
        trace!(timer = id.0, fire_at, "timer scheduled");
        id
    }

    /// Cancel a timer by ID; returns whether it was still pending
    pub fn clear_timeout(&self, id: TimerId) -> bool {
        self.shared.state.borrow_mut().timers.remove(&id).is_some()
    }

    /// Check if there are pending microtasks
    pub fn has_pending_microtasks(&self) -> bool {
        !self.shared.state.borrow().microtasks.is_empty()
    }

    /// Check if there are pending timers
    pub fn has_pending_macrotasks(&self) -> bool {
        !self.shared.state.borrow().timers.is_empty()
    }

    /// Check if the event loop has any pending work
    pub fn has_pending_work(&self) -> bool {
        self.has_pending_microtasks() || self.has_pending_macrotasks()
    }

    /// Run one microtask checkpoint: drain the queue, including tasks queued
    /// while draining, until it is empty or the budget is spent.
    pub fn run_microtasks(&self) -> Result<usize> {
        let budget = self.shared.state.borrow().config.microtask_budget;
        let mut count: usize = 0;

        loop {
            // Pop in its own statement: the task may schedule more work.
            let task = self.shared.state.borrow_mut().microtasks.pop_front();
            let Some(task) = task else { break };
            task();
            count += 1;

            if budget != 0 && count >= budget && self.has_pending_microtasks() {
                let remaining = self.shared.state.borrow().microtasks.len();
                self.record_checkpoint(count);
                warn!(budget, remaining, "microtask budget exceeded");
                return Err(Error::MicrotaskBudgetExceeded { budget, remaining });
            }
        }

        self.record_checkpoint(count);
        Ok(count)
    }

    /// Run the event loop until no work remains:
    ///   1. Drain all microtasks
    ///   2. Advance virtual time to the earliest timer and run it
    ///   3. Repeat from step 1
    pub fn run_until_idle(&self) -> Result<RunResult> {
        self.run(None)
    }

    /// Like [`run_until_idle`](Self::run_until_idle), but only fires timers
    /// due within `ms` of the current time, then moves the clock there.
    pub fn advance_time(&self, ms: u64) -> Result<RunResult> {
        let deadline = self.current_time().saturating_add(ms);
        let result = self.run(Some(deadline))?;
        let mut state = self.shared.state.borrow_mut();
        state.virtual_time = state.virtual_time.max(deadline);
        Ok(RunResult {
            final_time: state.virtual_time,
            ..result
        })
    }

    fn run(&self, deadline: Option<u64>) -> Result<RunResult> {
        let mut result = RunResult::default();

        loop {
            result.microtasks_processed += self.run_microtasks()?;

            let Some(task) = self.take_next_timer(deadline) else {
                break;
            };
            (task.callback)();
            result.macrotasks_processed += 1;
            self.shared.state.borrow_mut().stats.total_macrotasks += 1;
        }

        result.final_time = self.current_time();
        Ok(result)
    }

    /// Remove the earliest due timer, advancing virtual time to it.
    /// Ties fire in scheduling order.
    fn take_next_timer(&self, deadline: Option<u64>) -> Option<Macrotask> {
        let mut state = self.shared.state.borrow_mut();
        let (&id, task) = state.timers.iter().min_by_key(|(id, task)| (task.fire_at, **id))?;
        if deadline.is_some_and(|limit| task.fire_at > limit) {
            return None;
        }
        let task = state.timers.remove(&id)?;
        state.virtual_time = state.virtual_time.max(task.fire_at);
        trace!(timer = id.0, time = state.virtual_time, "timer fired");
        Some(task)
    }

    fn record_checkpoint(&self, count: usize) {
        let mut state = self.shared.state.borrow_mut();
        state.stats.total_checkpoints += 1;
        state.stats.total_microtasks += count as u64;
        if (count as u64) > state.stats.max_microtasks_per_checkpoint {
            state.stats.max_microtasks_per_checkpoint = count as u64;
        }
    }

    /// Get and clear recorded unhandled rejections
    pub fn drain_unhandled_rejections(&self) -> Vec<UnhandledRejection> {
        std::mem::take(&mut self.shared.state.borrow_mut().unhandled_rejections)
    }

    /// Get a snapshot of the current event loop statistics
    pub fn stats(&self) -> EventLoopStats {
        self.shared.state.borrow().stats.clone()
    }

    /// Reset all event loop statistics to zero
    pub fn reset_stats(&self) {
        self.shared.state.borrow_mut().stats = EventLoopStats::default();
    }

    /// Drop all pending work without running it
    pub fn clear(&self) {
        let mut state = self.shared.state.borrow_mut();
        state.microtasks.clear();
        state.timers.clear();
        state.unhandled_rejections.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn FnOnce()>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let make = move |label: &'static str| -> Box<dyn FnOnce()> {
            let sink = sink.clone();
            Box::new(move || sink.borrow_mut().push(label))
        };
        (log, make)
    }

    #[test]
    fn test_event_loop_creation() {
        let el = EventLoop::new();
        assert_eq!(el.current_time(), 0);
        assert!(!el.has_pending_work());
    }

    #[test]
    fn test_microtasks_run_fifo() {
        let el = EventLoop::new();
        let (log, task) = recorder();

        el.queue_microtask(task("a"));
        el.scheduler().schedule(task("b"));
        el.queue_microtask(task("c"));
        assert!(el.has_pending_microtasks());
        assert!(log.borrow().is_empty());

        assert_eq!(el.run_microtasks().unwrap(), 3);
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_nested_microtask_runs_after_queued_ones() {
        let el = EventLoop::new();
        let (log, task) = recorder();

        let inner = el.clone();
        let nested = task("nested");
        let outer = task("outer");
        el.queue_microtask(move || {
            outer();
            inner.queue_microtask(nested);
        });
        el.queue_microtask(task("second"));

        el.run_microtasks().unwrap();
        assert_eq!(*log.borrow(), vec!["outer", "second", "nested"]);
    }

    #[test]
    fn test_timers_fire_in_time_then_schedule_order() {
        let el = EventLoop::new();
        let (log, task) = recorder();

        el.set_timeout(20, task("t20"));
        el.set_timeout(10, task("t10-a"));
        el.set_timeout(10, task("t10-b"));
        el.queue_microtask(task("micro"));

        let result = el.run_until_idle().unwrap();
        assert_eq!(*log.borrow(), vec!["micro", "t10-a", "t10-b", "t20"]);
        assert_eq!(result.macrotasks_processed, 3);
        assert_eq!(result.final_time, 20);
    }

    #[test]
    fn test_microtasks_drain_between_timers() {
        let el = EventLoop::new();
        let (log, task) = recorder();

        let handle = el.clone();
        let first = task("timer-1");
        let follow = task("micro-after-1");
        el.set_timeout(5, move || {
            first();
            handle.queue_microtask(follow);
        });
        el.set_timeout(5, task("timer-2"));

        el.run_until_idle().unwrap();
        assert_eq!(*log.borrow(), vec!["timer-1", "micro-after-1", "timer-2"]);
    }

    #[test]
    fn test_timer_cancellation() {
        let el = EventLoop::new();
        let fired = Rc::new(Cell::new(false));
        let flag = fired.clone();

        let id = el.set_timeout(100, move || flag.set(true));
        assert!(el.clear_timeout(id));
        assert!(!el.clear_timeout(id));

        el.run_until_idle().unwrap();
        assert!(!fired.get());
    }

    #[test]
    fn test_advance_time_stops_at_deadline() {
        let el = EventLoop::new();
        let (log, task) = recorder();

        el.set_timeout(10, task("early"));
        el.set_timeout(50, task("late"));

        let result = el.advance_time(20).unwrap();
        assert_eq!(*log.borrow(), vec!["early"]);
        assert_eq!(result.final_time, 20);
        assert!(el.has_pending_macrotasks());

        el.advance_time(30).unwrap();
        assert_eq!(*log.borrow(), vec!["early", "late"]);
        assert_eq!(el.current_time(), 50);
    }

    #[test]
    fn test_timer_delay_is_clamped() {
        let el = EventLoop::with_config(EventLoopConfig {
            max_timer_delay_ms: 100,
            ..EventLoopConfig::default()
        });
        el.set_timeout(u64::MAX, || {});
        let result = el.run_until_idle().unwrap();
        assert_eq!(result.final_time, 100);
    }

    #[test]
    fn test_microtask_budget_exceeded() {
        let el = EventLoop::with_config(EventLoopConfig {
            microtask_budget: 10,
            ..EventLoopConfig::default()
        });

        fn requeue(el: EventLoop) {
            let next = el.clone();
            el.queue_microtask(move || requeue(next));
        }
        requeue(el.clone());

        let err = el.run_microtasks().unwrap_err();
        assert!(matches!(
            err,
            Error::MicrotaskBudgetExceeded {
                budget: 10,
                remaining: 1
            }
        ));
        assert_eq!(el.stats().max_microtasks_per_checkpoint, 10);
    }

    #[test]
    fn test_unhandled_rejection_tracking() {
        let el = EventLoop::new();
        let scheduler = el.scheduler();
        let first = DeferredId::next();
        let second = DeferredId::next();

        scheduler.report_unhandled_rejection(UnhandledRejection {
            id: first,
            reason: "\"a\"".to_string(),
        });
        scheduler.report_unhandled_rejection(UnhandledRejection {
            id: second,
            reason: "\"b\"".to_string(),
        });
        scheduler.revoke_unhandled_rejection(first);

        let drained = el.drain_unhandled_rejections();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].id, second);
        assert!(el.drain_unhandled_rejections().is_empty());

        let stats = el.stats();
        assert_eq!(stats.unhandled_rejections_reported, 2);
        assert_eq!(stats.unhandled_rejections_revoked, 1);
    }

    #[test]
    fn test_untracked_rejections_are_only_counted() {
        let el = EventLoop::with_config(EventLoopConfig {
            track_unhandled_rejections: false,
            ..EventLoopConfig::default()
        });
        el.scheduler().report_unhandled_rejection(UnhandledRejection {
            id: DeferredId::next(),
            reason: "x".to_string(),
        });
        assert!(el.drain_unhandled_rejections().is_empty());
        assert_eq!(el.stats().unhandled_rejections_reported, 1);
    }

    #[test]
    fn test_stats_and_reset() {
        let el = EventLoop::new();
        el.queue_microtask(|| {});
        el.queue_microtask(|| {});
        el.set_timeout(1, || {});
        el.run_until_idle().unwrap();

        let stats = el.stats();
        assert_eq!(stats.total_microtasks, 2);
        assert_eq!(stats.total_macrotasks, 1);
        assert_eq!(stats.max_microtasks_per_checkpoint, 2);

        // Any handle may reset; all of them observe it.
        let handle = el.clone();
        handle.reset_stats();
        assert_eq!(el.stats(), EventLoopStats::default());
    }

    #[test]
    fn test_clear_drops_pending_work() {
        let el = EventLoop::new();
        el.queue_microtask(|| panic!("cleared task ran"));
        el.set_timeout(5, || panic!("cleared timer ran"));
        el.clear();
        assert!(!el.has_pending_work());
        assert_eq!(el.run_until_idle().unwrap(), RunResult::default());
    }
}
