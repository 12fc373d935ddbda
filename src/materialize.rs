use std::sync::Arc;

use crate::{Cancellable, Error, Outcome, Unit, UnitObserver};

/// The outcome of a unit, as a value.
#[derive(Debug, Clone)]
pub enum Notification<T> {
    /// The unit succeeded with a value.
    Value(T),
    /// The unit completed without a value.
    Empty,
    /// The unit failed.
    Error(Error),
}

impl<T> Notification<T> {
    #[inline]
    pub fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }
}

impl<T> From<Outcome<T>> for Notification<T> {
    fn from(outcome: Outcome<T>) -> Self {
        match outcome {
            Outcome::Completed => Self::Empty,
            Outcome::Succeeded(value) => Self::Value(value),
            Outcome::Failed(error) => Self::Error(error),
        }
    }
}

/// A unit that reports the outcome of another unit as a [`Notification`], and never fails.
///
/// Created by [`UnitExt::materialize`][crate::UnitExt::materialize].
pub struct Materialize<U> {
    unit: U,
}

impl<U> Materialize<U> {
    pub(crate) fn new(unit: U) -> Self {
        Self { unit }
    }
}

impl<T, U> Unit<Notification<T>> for Materialize<U>
where
    T: 'static,
    U: Unit<T>,
{
    fn subscribe(&self, observer: Arc<dyn UnitObserver<Notification<T>>>) {
        self.unit.subscribe(Arc::new(MaterializeObserver(observer)));
    }
}

struct MaterializeObserver<T>(Arc<dyn UnitObserver<Notification<T>>>);

impl<T> UnitObserver<T> for MaterializeObserver<T> {
    fn on_subscribe(&self, handle: Arc<dyn Cancellable>) {
        self.0.on_subscribe(handle);
    }

    fn on_outcome(&self, outcome: Outcome<T>) {
        self.0.on_outcome(Outcome::Succeeded(outcome.into()));
    }
}
