//! The collaborator traits every source, unit and operator in this crate is built from.
//!
//! There are two kinds of producers:
//!
//! - A [`Source`] emits any number of items to a [`Subscriber`], followed by at most one terminal
//!   signal. Items are only emitted after they have been requested through the [`Subscription`]
//!   that is handed to the [`Subscriber`] first.
//! - A [`Unit`] reports exactly one [`Outcome`] to a [`UnitObserver`], after handing it a
//!   [`Cancellable`] handle. A *completion-only* unit reports [`Outcome::Completed`] or
//!   [`Outcome::Failed`]; an *optional-value* unit may additionally report
//!   [`Outcome::Succeeded`].
//!
//! Signals may be delivered from any thread, but a producer never delivers two signals to the same
//! consumer concurrently.

use std::sync::Arc;

use crate::Error;

/// A handle that stops an operation.
///
/// Cancelling is idempotent and may race with the operation finishing on its own.
pub trait Cancellable: Send + Sync {
    fn cancel(&self);
}

/// The link between a [`Source`] and one of its [`Subscriber`]s.
pub trait Subscription: Cancellable {
    /// Allows the source to emit `n` more items.
    ///
    /// Demand is additive and saturates at [`usize::MAX`], which means "unbounded".
    fn request(&self, n: usize);
}

/// Receives the signals of a [`Source`].
pub trait Subscriber<T>: Send + Sync {
    /// Called once, before any other signal.
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>);
    fn on_next(&self, item: T);
    fn on_error(&self, error: Error);
    fn on_complete(&self);
}

/// A producer of zero or more items.
pub trait Source<T>: Send + Sync {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>);
}

/// The single result of a [`Unit`].
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    /// Finished without a payload.
    Completed,
    /// Finished with a payload.
    Succeeded(T),
    Failed(Error),
}

impl<T> Outcome<T> {
    #[inline]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Completed => Outcome::Completed,
            Self::Succeeded(value) => Outcome::Succeeded(f(value)),
            Self::Failed(error) => Outcome::Failed(error),
        }
    }

    /// Converts the outcome into a [`Result`], with [`None`] standing for an empty completion.
    pub fn into_result(self) -> Result<Option<T>, Error> {
        match self {
            Self::Completed => Ok(None),
            Self::Succeeded(value) => Ok(Some(value)),
            Self::Failed(error) => Err(error),
        }
    }
}

/// Receives the [`Outcome`] of a [`Unit`].
pub trait UnitObserver<T>: Send + Sync {
    /// Called once, synchronously from [`Unit::subscribe`], before the outcome is delivered.
    fn on_subscribe(&self, handle: Arc<dyn Cancellable>);
    fn on_outcome(&self, outcome: Outcome<T>);
}

/// An asynchronous operation with a single [`Outcome`].
pub trait Unit<T>: Send + Sync {
    fn subscribe(&self, observer: Arc<dyn UnitObserver<T>>);
}

impl<T, S: Source<T> + ?Sized> Source<T> for Arc<S> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        (**self).subscribe(subscriber)
    }
}

impl<T, S: Source<T> + ?Sized> Source<T> for Box<S> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        (**self).subscribe(subscriber)
    }
}

impl<T, U: Unit<T> + ?Sized> Unit<T> for Arc<U> {
    fn subscribe(&self, observer: Arc<dyn UnitObserver<T>>) {
        (**self).subscribe(observer)
    }
}

impl<T, U: Unit<T> + ?Sized> Unit<T> for Box<U> {
    fn subscribe(&self, observer: Arc<dyn UnitObserver<T>>) {
        (**self).subscribe(observer)
    }
}
