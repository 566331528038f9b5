//! Shared test helpers for integration tests

use deferred::{Deferred, EventLoop};
use std::cell::RefCell;
use std::rc::Rc;

pub type D = Deferred<i32, String>;

/// Route `tracing` output through the test harness; set `RUST_LOG` to see it
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A deferred fulfilled by a timer `delay_ms` from now
#[allow(dead_code)]
pub fn fulfill_after(event_loop: &EventLoop, delay_ms: u64, value: i32) -> D {
    let timers = event_loop.clone();
    Deferred::new(&event_loop.scheduler(), move |resolver| {
        timers.set_timeout(delay_ms, move || resolver.fulfill(value));
        Ok(())
    })
}

/// A deferred rejected by a timer `delay_ms` from now
#[allow(dead_code)]
pub fn reject_after(event_loop: &EventLoop, delay_ms: u64, reason: &str) -> D {
    let timers = event_loop.clone();
    let reason = reason.to_string();
    Deferred::new(&event_loop.scheduler(), move |resolver| {
        timers.set_timeout(delay_ms, move || resolver.reject(reason));
        Ok(())
    })
}

/// Shared append-only log for observing callback order
#[allow(dead_code)]
pub fn event_log() -> Rc<RefCell<Vec<String>>> {
    Rc::new(RefCell::new(Vec::new()))
}
