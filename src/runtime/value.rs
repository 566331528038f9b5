//! Value vocabulary shared by the deferred state machine and its combinators
//!
//! A [`Deferred`] moves through [`State`]s and ends in a [`Settlement`].
//! Anything that can settle a deferred successfully is a [`Resolution`]:
//! either a plain value or something adoptable through the [`Thenable`]
//! capability.

use super::promise::Deferred;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// ID counter for deferred tracking
static DEFERRED_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a deferred, used in logs and rejection reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeferredId(u64);

impl DeferredId {
    pub(crate) fn next() -> Self {
        DeferredId(DEFERRED_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw counter value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeferredId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Deferred state
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    /// Not yet settled (possibly locked in to an adopted thenable)
    Pending,
    /// Settled with a value
    Fulfilled,
    /// Settled with a reason
    Rejected,
}

/// Terminal outcome of a deferred.
///
/// Serializes as a status-tagged record, the same shape `all_settled`
/// reports for each input:
///
/// ```
/// use deferred::Settlement;
///
/// let ok: Settlement<i32, String> = Settlement::Fulfilled { value: 1 };
/// assert_eq!(
///     serde_json::to_string(&ok).unwrap(),
///     r#"{"status":"fulfilled","value":1}"#
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Settlement<T, E> {
    /// Fulfilled with `value`
    Fulfilled { value: T },
    /// Rejected with `reason`
    Rejected { reason: E },
}

impl<T, E> Settlement<T, E> {
    /// The state this outcome leaves a deferred in
    pub fn state(&self) -> State {
        match self {
            Settlement::Fulfilled { .. } => State::Fulfilled,
            Settlement::Rejected { .. } => State::Rejected,
        }
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Settlement::Fulfilled { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Settlement::Rejected { .. })
    }

    /// Convert into a `Result`, fulfilled values on the `Ok` side
    pub fn into_result(self) -> Result<T, E> {
        match self {
            Settlement::Fulfilled { value } => Ok(value),
            Settlement::Rejected { reason } => Err(reason),
        }
    }
}

impl<T, E> From<Result<T, E>> for Settlement<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Settlement::Fulfilled { value },
            Err(reason) => Settlement::Rejected { reason },
        }
    }
}

/// Success callback handed to [`Thenable::then`]. It may itself receive
/// something adoptable, so adoption recurses.
pub type OnSuccess<T, E> = Box<dyn FnOnce(Resolution<T, E>)>;

/// Failure callback handed to [`Thenable::then`]
pub type OnFailure<E> = Box<dyn FnOnce(E)>;

/// Anything exposing a two-argument `then`.
///
/// This is the interop seam for foreign deferred-value implementations: any
/// type implementing it can be adopted by a [`Deferred`], and `Deferred`
/// implements it so it can be adopted by others. An implementation should
/// call at most one callback, at most once; extra calls are ignored by the
/// adopter. Returning `Err` means subscribing itself failed.
pub trait Thenable<T, E> {
    fn then(&self, on_success: OnSuccess<T, E>, on_failure: OnFailure<E>) -> Result<(), E>;
}

/// What a success settlement or a reaction callback may produce.
pub enum Resolution<T, E> {
    /// A plain value; settles immediately
    Value(T),
    /// A deferred of this implementation; adopted (and returned unchanged by
    /// [`resolve`](crate::resolve))
    Deferred(Deferred<T, E>),
    /// A foreign thenable; adopted
    Thenable(Rc<dyn Thenable<T, E>>),
}

/// Result of the adoption predicate
pub(crate) enum Adoption<T, E> {
    Plain(T),
    /// A deferred of this implementation, followed directly
    Follow(Deferred<T, E>),
    /// A foreign thenable, subscribed to through its `then`
    Adopt(Rc<dyn Thenable<T, E>>),
}

impl<T: Clone + 'static, E: Clone + fmt::Debug + 'static> Resolution<T, E> {
    /// Wrap a foreign thenable
    pub fn thenable(thenable: impl Thenable<T, E> + 'static) -> Self {
        Resolution::Thenable(Rc::new(thenable))
    }

    /// Whether settling with this resolution adopts instead of fulfilling
    pub fn is_thenable(&self) -> bool {
        !matches!(self, Resolution::Value(_))
    }

    /// The one adoption predicate: split off plain values from everything
    /// that has to be adopted.
    pub(crate) fn into_adoption(self) -> Adoption<T, E> {
        match self {
            Resolution::Value(value) => Adoption::Plain(value),
            Resolution::Deferred(deferred) => Adoption::Follow(deferred),
            Resolution::Thenable(thenable) => Adoption::Adopt(thenable),
        }
    }
}

impl<T, E> From<Deferred<T, E>> for Resolution<T, E> {
    fn from(deferred: Deferred<T, E>) -> Self {
        Resolution::Deferred(deferred)
    }
}

impl<T, E> From<Rc<dyn Thenable<T, E>>> for Resolution<T, E> {
    fn from(thenable: Rc<dyn Thenable<T, E>>) -> Self {
        Resolution::Thenable(thenable)
    }
}

impl<T: fmt::Debug, E> fmt::Debug for Resolution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Deferred(deferred) => f.debug_tuple("Deferred").field(&deferred.id()).finish(),
            Resolution::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}

/// What a `then` callback returns; `Err` is a thrown reason
pub type Outcome<U, E> = Result<Resolution<U, E>, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settlement_state() {
        let ok: Settlement<i32, String> = Settlement::Fulfilled { value: 1 };
        let err: Settlement<i32, String> = Settlement::Rejected { reason: "x".to_string() };
        assert_eq!(ok.state(), State::Fulfilled);
        assert_eq!(err.state(), State::Rejected);
        assert!(ok.is_fulfilled());
        assert!(err.is_rejected());
        assert_eq!(err.into_result(), Err("x".to_string()));
    }

    #[test]
    fn test_settlement_serializes_as_status_record() {
        let err: Settlement<i32, String> = Settlement::Rejected { reason: "boom".to_string() };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json, serde_json::json!({"status": "rejected", "reason": "boom"}));

        let back: Settlement<i32, String> =
            serde_json::from_str(r#"{"status":"fulfilled","value":7}"#).unwrap();
        assert_eq!(back, Settlement::Fulfilled { value: 7 });
    }

    #[test]
    fn test_settlement_from_result() {
        let s: Settlement<u8, &str> = Err("no").into();
        assert_eq!(s, Settlement::Rejected { reason: "no" });
    }

    #[test]
    fn test_deferred_ids_are_unique() {
        let a = DeferredId::next();
        let b = DeferredId::next();
        assert_ne!(a, b);
        assert!(b > a);
        assert_eq!(format!("{}", a), format!("#{}", a.as_u64()));
    }

    #[test]
    fn test_plain_value_is_not_thenable() {
        let r: Resolution<i32, String> = Resolution::Value(3);
        assert!(!r.is_thenable());
        assert!(matches!(r.into_adoption(), Adoption::Plain(3)));
    }

    #[test]
    fn test_native_deferred_is_followed() {
        let el = crate::event_loop::EventLoop::new();
        let d: Deferred<i32, String> = Deferred::resolved(&el.scheduler(), 1);
        let r = Resolution::from(d.clone());
        assert!(r.is_thenable());
        assert!(matches!(r.into_adoption(), Adoption::Follow(other) if other.ptr_eq(&d)));
    }
}
