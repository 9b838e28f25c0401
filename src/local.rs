//! A `local::Deferred` lives on a single execution context. Its slots sit
//! behind an `Rc<RefCell<_>>` with no synchronization, so the type is neither
//! `Send` nor `Sync`.
use crate::{Outcome, Settle};
use std::{cell::RefCell, fmt, rc::Rc};
use tracing::trace;

type Continuation<T> = Rc<dyn Fn(T)>;

struct Slots<V, E> {
    on_success: Option<Continuation<V>>,
    on_failure: Option<Continuation<E>>,
}

/// A handle to a deferred outcome. Clones share the same slots, so a producer
/// can hold one handle while the consumer chains on another.
///
/// # Examples
///
/// ```
/// use deferred_chain::{local::Deferred, Settle};
/// use std::{cell::RefCell, rc::Rc};
///
/// #[derive(Debug, Clone, PartialEq)]
/// enum NetworkError { Timeout }
///
/// let caught = Rc::new(RefCell::new(None));
/// let sink = caught.clone();
/// let request = Deferred::<String, NetworkError>::new();
/// request
///     .then_effect(|_| unreachable!("a failure never reaches then_effect"))
///     .catch_effect(move |err| *sink.borrow_mut() = Some(err.clone()));
/// request.settle_failure(NetworkError::Timeout);
/// assert_eq!(*caught.borrow(), Some(NetworkError::Timeout));
/// ```
pub struct Deferred<V, E> {
    slots: Rc<RefCell<Slots<V, E>>>,
}

impl<V, E> Clone for Deferred<V, E> {
    fn clone(&self) -> Self {
        Self { slots: self.slots.clone() }
    }
}

impl<V, E> Default for Deferred<V, E> {
    fn default() -> Self {
        Self {
            slots: Rc::new(RefCell::new(Slots {
                on_success: None,
                on_failure: None,
            })),
        }
    }
}

impl<V, E> fmt::Debug for Deferred<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("on_success", &self.has_success_continuation())
            .field("on_failure", &self.has_failure_continuation())
            .finish()
    }
}

impl<V, E> Deferred<V, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_success_continuation(&self) -> bool {
        self.slots.borrow().on_success.is_some()
    }

    pub fn has_failure_continuation(&self) -> bool {
        self.slots.borrow().on_failure.is_some()
    }
}

impl<V: 'static, E: 'static> Deferred<V, E> {
    /// Run `block` on success, then pass the value on unchanged. A failure is
    /// forwarded to the returned Deferred untouched.
    pub fn then_effect<F>(&self, block: F) -> Deferred<V, E>
    where
        F: Fn(&V) + 'static,
    {
        let next = Deferred::new();
        let sub = next.clone();
        self.on_success(move |value| {
            block(&value);
            sub.settle_success(value);
        });
        self.forward_failure(&next);
        next
    }

    /// Transform the success value. A failure is forwarded untouched.
    pub fn then_map<VV, F>(&self, block: F) -> Deferred<VV, E>
    where
        VV: 'static,
        F: Fn(V) -> VV + 'static,
    {
        let next = Deferred::new();
        let sub = next.clone();
        self.on_success(move |value| sub.settle_success(block(value)));
        self.forward_failure(&next);
        next
    }

    /// Run `block` on failure, then pass the error on unchanged.
    ///
    /// This stage stops the success axis: a success settled on `self` after
    /// this call never reaches the returned Deferred.
    pub fn catch_effect<F>(&self, block: F) -> Deferred<V, E>
    where
        F: Fn(&E) + 'static,
    {
        let next = Deferred::new();
        let sub = next.clone();
        self.on_failure(move |err| {
            block(&err);
            sub.settle_failure(err);
        });
        next
    }

    /// Transform the error type. Like [`Deferred::catch_effect`], successes are
    /// not forwarded.
    pub fn map_error<EE, F>(&self, block: F) -> Deferred<V, EE>
    where
        EE: 'static,
        F: Fn(E) -> EE + 'static,
    {
        let next = Deferred::new();
        let sub = next.clone();
        self.on_failure(move |err| sub.settle_failure(block(err)));
        next
    }

    fn forward_failure<VV: 'static>(&self, next: &Deferred<VV, E>) {
        let sub = next.clone();
        self.on_failure(move |err| sub.settle_failure(err));
    }

    fn on_success(&self, continuation: impl Fn(V) + 'static) {
        let previous = self
            .slots
            .borrow_mut()
            .on_success
            .replace(Rc::new(continuation));
        if previous.is_some() {
            trace!("replaced success continuation");
        }
    }

    fn on_failure(&self, continuation: impl Fn(E) + 'static) {
        let previous = self
            .slots
            .borrow_mut()
            .on_failure
            .replace(Rc::new(continuation));
        if previous.is_some() {
            trace!("replaced failure continuation");
        }
    }
}

impl<V, E> Settle<V, E> for Deferred<V, E> {
    fn settle(&self, outcome: Outcome<V, E>) {
        // Clone the continuation out so the borrow is released before it runs.
        match outcome {
            Outcome::Success(value) => {
                let continuation = self.slots.borrow().on_success.clone();
                match continuation {
                    Some(continuation) => continuation(value),
                    None => trace!("no success continuation, settlement dropped"),
                }
            }
            Outcome::Failure(err) => {
                let continuation = self.slots.borrow().on_failure.clone();
                match continuation {
                    Some(continuation) => continuation(err),
                    None => trace!("no failure continuation, settlement dropped"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Deferred;
    use crate::Settle;
    use std::{cell::RefCell, rc::Rc};

    fn recorder<T>() -> (Rc<RefCell<Vec<T>>>, Rc<RefCell<Vec<T>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        (log.clone(), log)
    }

    #[test]
    fn test_then_effect_forwards_value() {
        let (seen, sink) = recorder();
        let (forwarded, sink2) = recorder();
        let d = Deferred::<i32, ()>::new();
        d.then_effect(move |v| sink.borrow_mut().push(*v))
            .then_effect(move |v| sink2.borrow_mut().push(*v));
        d.settle_success(7);
        assert_eq!(*seen.borrow(), vec![7]);
        assert_eq!(*forwarded.borrow(), vec![7]);
    }

    #[test]
    fn test_then_map_changes_value_type() {
        let (seen, sink) = recorder();
        let d = Deferred::<&'static str, ()>::new();
        d.then_map(|s| s.len()).then_effect(move |n| sink.borrow_mut().push(*n));
        d.settle_success("four");
        assert_eq!(*seen.borrow(), vec![4]);
    }

    #[test]
    fn test_failure_skips_then_stages() {
        let (seen, sink) = recorder::<String>();
        let (caught, err_sink) = recorder();
        let d = Deferred::<i32, String>::new();
        let sink_a = sink.clone();
        d.then_map(|v| v * 2)
            .then_effect(move |v| sink_a.borrow_mut().push(v.to_string()))
            .then_map(|v| v.to_string())
            .then_effect(move |s| sink.borrow_mut().push(s.clone()))
            .catch_effect(move |e| err_sink.borrow_mut().push(e.clone()));
        d.settle_failure("down".to_owned());
        assert!(seen.borrow().is_empty());
        assert_eq!(*caught.borrow(), vec!["down".to_owned()]);
    }

    #[test]
    fn test_success_skips_error_stages() {
        let (seen, sink) = recorder::<&'static str>();
        let d = Deferred::<i32, &'static str>::new();
        let caught = d.catch_effect(move |e| sink.borrow_mut().push(*e));
        let mapped = d.map_error(|e| e.len());
        let (after_catch, after_catch_sink) = recorder();
        let (after_map, after_map_sink) = recorder();
        caught.then_effect(move |v| after_catch_sink.borrow_mut().push(*v));
        mapped.then_effect(move |v| after_map_sink.borrow_mut().push(*v));
        d.settle_success(1);
        assert!(seen.borrow().is_empty());
        assert!(after_catch.borrow().is_empty());
        assert!(after_map.borrow().is_empty());
    }

    #[test]
    fn test_catch_effect_forwards_error() {
        let (first, first_sink) = recorder();
        let (second, second_sink) = recorder();
        let d = Deferred::<(), &'static str>::new();
        d.catch_effect(move |e| first_sink.borrow_mut().push(*e))
            .catch_effect(move |e| second_sink.borrow_mut().push(*e));
        d.settle_failure("x");
        assert_eq!(*first.borrow(), vec!["x"]);
        assert_eq!(*second.borrow(), vec!["x"]);
    }

    #[test]
    fn test_map_error_transforms_error() {
        let (seen, sink) = recorder();
        let d = Deferred::<(), &'static str>::new();
        d.map_error(|e| e.len()).catch_effect(move |n| sink.borrow_mut().push(*n));
        d.settle_failure("timeout");
        assert_eq!(*seen.borrow(), vec![7]);
    }

    #[test]
    fn test_last_registration_wins() {
        let (first, first_sink) = recorder();
        let (second, second_sink) = recorder();
        let d = Deferred::<i32, ()>::new();
        d.then_effect(move |v| first_sink.borrow_mut().push(*v));
        d.then_effect(move |v| second_sink.borrow_mut().push(*v));
        d.settle_success(3);
        assert!(first.borrow().is_empty());
        assert_eq!(*second.borrow(), vec![3]);
    }

    #[test]
    fn test_settlement_is_not_buffered() {
        let (seen, sink) = recorder();
        let d = Deferred::<i32, ()>::new();
        d.settle_success(1);
        d.then_effect(move |v| sink.borrow_mut().push(*v));
        assert!(seen.borrow().is_empty());
        d.settle_success(2);
        assert_eq!(*seen.borrow(), vec![2]);
    }

    #[test]
    fn test_repeated_settlement_reinvokes() {
        let (seen, sink) = recorder();
        let d = Deferred::<i32, ()>::new();
        d.then_effect(move |v| sink.borrow_mut().push(*v));
        d.settle_success(1);
        d.settle_success(2);
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_settle_without_continuation_is_noop() {
        let d = Deferred::<i32, i32>::new();
        assert!(!d.has_success_continuation());
        d.settle_success(1);
        d.settle_failure(2);
    }

    #[test]
    fn test_continuation_may_reregister_on_itself() {
        let (seen, sink) = recorder();
        let d = Deferred::<i32, ()>::new();
        let handle = d.clone();
        d.then_effect(move |v| {
            let sink = sink.clone();
            sink.borrow_mut().push(*v);
            handle.then_effect(move |v| sink.borrow_mut().push(*v * 10));
        });
        d.settle_success(1);
        d.settle_success(2);
        assert_eq!(*seen.borrow(), vec![1, 20]);
    }

    #[test]
    fn test_settle_result_routes_by_variant() {
        let (seen, sink) = recorder();
        let (caught, err_sink) = recorder();
        let d = Deferred::<i32, String>::new();
        d.then_effect(move |v| sink.borrow_mut().push(*v));
        d.catch_effect(move |e| err_sink.borrow_mut().push(e.clone()));
        // catch_effect replaced the failure forwarding wired by then_effect.
        d.settle_result(Ok(5));
        d.settle_result(Err("nope".to_owned()));
        assert_eq!(*seen.borrow(), vec![5]);
        assert_eq!(*caught.borrow(), vec!["nope".to_owned()]);
    }

    #[test]
    fn test_chain_drops_with_source() {
        let d = Deferred::<i32, ()>::new();
        let tail = d.then_map(|v| v + 1);
        let weak = Rc::downgrade(&tail.slots);
        drop(tail);
        assert!(weak.upgrade().is_some());
        drop(d);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_debug_reports_slots() {
        let d = Deferred::<i32, ()>::new();
        let _ = d.then_effect(|_| {});
        assert_eq!(
            format!("{:?}", d),
            "Deferred { on_success: true, on_failure: true }"
        );
    }
}
