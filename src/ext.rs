//! Extension traits that attach the operators to every [`Source`] and [`Unit`].

use std::sync::Arc;

use crate::{
    capture::ErrorMode,
    concat::{erase_mapper, ConcatMapCompletable, ConcatMapMaybe},
    materialize::Materialize,
    switch::SwitchMapCompletable,
    unit::SubscribeOn,
    Error, Scheduler, Source, Unit,
};

/// Operators that bridge a [`Source`] of items to units.
///
/// Every mapper is called on the thread that delivers the item. Returning an [`Err`] is treated
/// like the mapped unit failing.
pub trait SourceExt<T>: Source<T> + Sized {
    /// Maps every item to a completion-only unit and runs the units one after another.
    ///
    /// At most `prefetch` items are requested from the source ahead of time. The first failure of
    /// the source or of any unit cancels everything else and fails the returned unit.
    ///
    /// # Panics
    ///
    /// Panics if `prefetch` is 0.
    fn concat_map_completable<U, F>(self, mapper: F, prefetch: usize) -> ConcatMapCompletable<Self, T>
    where
        T: 'static,
        U: Unit<()> + 'static,
        F: Fn(T) -> Result<U, Error> + Send + Sync + 'static,
    {
        ConcatMapCompletable::new(self, erase_mapper(mapper), ErrorMode::Immediate, prefetch)
    }

    /// Like [`SourceExt::concat_map_completable`], but collects failures instead of failing
    /// right away.
    ///
    /// With `till_the_end == false`, the first failure lets the active unit finish and then fails
    /// without starting any queued unit. With `till_the_end == true`, every item is still mapped
    /// and run, and the collected failures are reported once the source and all units are done.
    fn concat_map_completable_delay_error<U, F>(
        self,
        mapper: F,
        till_the_end: bool,
        prefetch: usize,
    ) -> ConcatMapCompletable<Self, T>
    where
        T: 'static,
        U: Unit<()> + 'static,
        F: Fn(T) -> Result<U, Error> + Send + Sync + 'static,
    {
        ConcatMapCompletable::new(
            self,
            erase_mapper(mapper),
            ErrorMode::delayed(till_the_end),
            prefetch,
        )
    }

    /// Maps every item to a completion-only unit, cancelling the unit of the previous item.
    ///
    /// The returned unit completes once the source has completed and the latest unit has
    /// completed. Any failure of the source or of the latest unit fails it right away.
    fn switch_map_completable<U, F>(self, mapper: F) -> SwitchMapCompletable<Self, T>
    where
        T: 'static,
        U: Unit<()> + 'static,
        F: Fn(T) -> Result<U, Error> + Send + Sync + 'static,
    {
        SwitchMapCompletable::new(self, erase_mapper(mapper), false)
    }

    /// Like [`SourceExt::switch_map_completable`], but collects failures (including those of
    /// replaced units) and reports them once the source and the latest unit are done.
    fn switch_map_completable_delay_error<U, F>(self, mapper: F) -> SwitchMapCompletable<Self, T>
    where
        T: 'static,
        U: Unit<()> + 'static,
        F: Fn(T) -> Result<U, Error> + Send + Sync + 'static,
    {
        SwitchMapCompletable::new(self, erase_mapper(mapper), true)
    }

    /// Maps every item to an optional-value unit, runs the units one after another and emits
    /// their values in item order.
    ///
    /// Units that complete without a value are skipped. Values are only emitted as requested by
    /// the subscriber; while a value waits for demand, no further unit is started.
    ///
    /// # Panics
    ///
    /// Panics if `prefetch` is 0.
    fn concat_map_maybe<R, U, F>(self, mapper: F, prefetch: usize) -> ConcatMapMaybe<Self, T, R>
    where
        T: 'static,
        R: Send + 'static,
        U: Unit<R> + 'static,
        F: Fn(T) -> Result<U, Error> + Send + Sync + 'static,
    {
        ConcatMapMaybe::new(self, erase_mapper(mapper), ErrorMode::Immediate, prefetch)
    }

    /// Like [`SourceExt::concat_map_maybe`], but collects failures, see
    /// [`SourceExt::concat_map_completable_delay_error`].
    ///
    /// A value that is waiting for demand when a failure occurs in boundary mode is still emitted
    /// before the failure.
    fn concat_map_maybe_delay_error<R, U, F>(
        self,
        mapper: F,
        till_the_end: bool,
        prefetch: usize,
    ) -> ConcatMapMaybe<Self, T, R>
    where
        T: 'static,
        R: Send + 'static,
        U: Unit<R> + 'static,
        F: Fn(T) -> Result<U, Error> + Send + Sync + 'static,
    {
        ConcatMapMaybe::new(
            self,
            erase_mapper(mapper),
            ErrorMode::delayed(till_the_end),
            prefetch,
        )
    }
}

impl<T, S: Source<T>> SourceExt<T> for S {}

/// Operators on units.
pub trait UnitExt<T>: Unit<T> + Sized {
    /// Subscribes to this unit from a task run by `scheduler`.
    ///
    /// The outcome is delivered on whatever thread the unit settles on.
    fn subscribe_on<S: Scheduler + 'static>(self, scheduler: S) -> SubscribeOn<Self> {
        SubscribeOn::new(self, Arc::new(scheduler))
    }

    /// Turns the outcome of this unit into a [`Notification`][crate::Notification] value.
    fn materialize(self) -> Materialize<Self> {
        Materialize::new(self)
    }
}

impl<T, U: Unit<T>> UnitExt<T> for U {}
