//! A `shared::Deferred` keeps its slots behind an `Arc<Mutex<_>>` so it can be
//! settled from a worker thread while the consumer chains on another. The
//! lock only guards reads and writes of the slots; continuations run after it
//! is released, on the thread that settles.
use crate::{Error, Outcome, Settle};
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::{trace, warn};

type Continuation<T> = Arc<dyn Fn(T) + Send + Sync>;

struct Slots<V, E> {
    on_success: Option<Continuation<V>>,
    on_failure: Option<Continuation<E>>,
}

/// The thread-safe Deferred. Clones share the same slots.
///
/// # Examples
///
/// ```
/// use deferred_chain::{shared::Deferred, Settle};
/// use std::{sync::mpsc::channel, thread, time::Duration};
///
/// let (tx, rx) = channel();
/// let source = Deferred::<String, ()>::new();
/// source
///     .then_map(|s| s.parse::<i32>().unwrap_or_default())
///     .then_effect(move |n| tx.send(*n).unwrap());
///
/// let producer = source.clone();
/// let task = thread::spawn(move || {
///     thread::sleep(Duration::from_millis(50));
///     producer.settle_success("10".into());
/// });
/// assert_eq!(rx.recv().unwrap(), 10);
/// task.join().expect("The producer thread has panicked");
/// ```
pub struct Deferred<V, E> {
    slots: Arc<Mutex<Slots<V, E>>>,
}

impl<V, E> Clone for Deferred<V, E> {
    fn clone(&self) -> Self {
        Self { slots: self.slots.clone() }
    }
}

impl<V, E> Default for Deferred<V, E> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
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
        self.slots().on_success.is_some()
    }

    pub fn has_failure_continuation(&self) -> bool {
        self.slots().on_failure.is_some()
    }

    /// Settle, reporting a poisoned lock instead of dropping the outcome
    /// silently.
    pub fn try_settle(&self, outcome: Outcome<V, E>) -> Result<(), Error> {
        match outcome {
            Outcome::Success(value) => {
                let continuation = self.lock()?.on_success.clone();
                match continuation {
                    Some(continuation) => continuation(value),
                    None => trace!("no success continuation, settlement dropped"),
                }
            }
            Outcome::Failure(err) => {
                let continuation = self.lock()?.on_failure.clone();
                match continuation {
                    Some(continuation) => continuation(err),
                    None => trace!("no failure continuation, settlement dropped"),
                }
            }
        }
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Slots<V, E>>, Error> {
        self.slots.lock().map_err(|_| Error::Poisoned)
    }

    // Registration never fails. The slots only ever hold whole `Option`s, so a
    // poisoned guard is still consistent.
    fn slots(&self) -> MutexGuard<'_, Slots<V, E>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V: 'static, E: 'static> Deferred<V, E> {
    /// Run `block` on success, then pass the value on unchanged. A failure is
    /// forwarded to the returned Deferred untouched.
    pub fn then_effect<F>(&self, block: F) -> Deferred<V, E>
    where
        F: Fn(&V) + Send + Sync + 'static,
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

    pub fn then_map<VV, F>(&self, block: F) -> Deferred<VV, E>
    where
        VV: 'static,
        F: Fn(V) -> VV + Send + Sync + 'static,
    {
        let next = Deferred::new();
        let sub = next.clone();
        self.on_success(move |value| sub.settle_success(block(value)));
        self.forward_failure(&next);
        next
    }

    /// Run `block` on failure, then pass the error on unchanged. Successes stop
    /// here.
    pub fn catch_effect<F>(&self, block: F) -> Deferred<V, E>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let next = Deferred::new();
        let sub = next.clone();
        self.on_failure(move |err| {
            block(&err);
            sub.settle_failure(err);
        });
        next
    }

    pub fn map_error<EE, F>(&self, block: F) -> Deferred<V, EE>
    where
        EE: 'static,
        F: Fn(E) -> EE + Send + Sync + 'static,
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

    fn on_success(&self, continuation: impl Fn(V) + Send + Sync + 'static) {
        let previous = self.slots().on_success.replace(Arc::new(continuation));
        if previous.is_some() {
            trace!("replaced success continuation");
        }
    }

    fn on_failure(&self, continuation: impl Fn(E) + Send + Sync + 'static) {
        let previous = self.slots().on_failure.replace(Arc::new(continuation));
        if previous.is_some() {
            trace!("replaced failure continuation");
        }
    }
}

impl<V, E> Settle<V, E> for Deferred<V, E> {
    fn settle(&self, outcome: Outcome<V, E>) {
        if let Err(err) = self.try_settle(outcome) {
            warn!(%err, "settlement dropped");
        }
    }
}
