//! A one-shot deferred value with chained continuations.
//!
//! A producer creates a [`local::Deferred`] (or a [`shared::Deferred`] when the
//! outcome arrives on another thread), starts some asynchronous work, and
//! settles it through [`Settle`]. A consumer chains stages onto it with
//! `then_effect`, `then_map`, `catch_effect` and `map_error`; every stage
//! returns a new Deferred.
//!
//! Each Deferred keeps one success and one failure continuation. Registering
//! another one of the same kind replaces it, and a settlement that finds an
//! empty slot is dropped, not buffered.
//!
//! # Examples
//!
//! ```
//! use deferred_chain::{local::Deferred, Settle};
//! use std::{cell::Cell, rc::Rc};
//!
//! let seen = Rc::new(Cell::new(0));
//! let sink = seen.clone();
//! let source = Deferred::<String, ()>::new();
//! source
//!     .then_map(|s| s.parse::<i32>().unwrap_or_default())
//!     .then_effect(move |n| sink.set(*n));
//! source.settle_success("10".into());
//! assert_eq!(seen.get(), 10);
//! ```
use thiserror::Error;

pub mod local;
#[cfg(feature = "shared")]
pub mod shared;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("the deferred slots lock was poisoned by a thread that panicked while holding it")]
    Poisoned,
}

/// The value a settlement carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<V, E> {
    Success(V),
    Failure(E),
}

impl<V, E> Outcome<V, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn into_result(self) -> Result<V, E> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(err) => Err(err),
        }
    }
}

impl<V, E> From<Result<V, E>> for Outcome<V, E> {
    fn from(result: Result<V, E>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(err) => Outcome::Failure(err),
        }
    }
}

/// The producer side of a Deferred.
///
/// Settling invokes whichever continuation is stored at that moment,
/// synchronously, on the calling thread. Nothing latches: settling twice runs
/// the continuation twice.
pub trait Settle<V, E> {
    fn settle(&self, outcome: Outcome<V, E>);

    fn settle_success(&self, value: V) {
        self.settle(Outcome::Success(value))
    }

    fn settle_failure(&self, err: E) {
        self.settle(Outcome::Failure(err))
    }

    /// Settle from a `Result`, e.g. the return value of a blocking call run on
    /// a worker thread.
    fn settle_result(&self, result: Result<V, E>) {
        self.settle(result.into())
    }
}
