//! Basic [`Unit`] implementations.

use std::{
    marker::PhantomData,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    handle::HandleCell, Cancellable, Error, Outcome, Scheduler, Unit, UnitObserver,
};

/// A handle that remembers whether it was cancelled.
#[derive(Default)]
struct Flag(AtomicBool);

impl Flag {
    fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Cancellable for Flag {
    fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn settle<T>(observer: Arc<dyn UnitObserver<T>>, outcome: Outcome<T>) {
    let flag = Arc::new(Flag::default());
    observer.on_subscribe(flag.clone());
    if !flag.is_set() {
        observer.on_outcome(outcome);
    }
}

/// Creates a completion-only unit that completes right away.
pub fn complete() -> Empty<()> {
    empty()
}

/// Creates a unit that completes without a value right away.
pub fn empty<T>() -> Empty<T> {
    Empty(PhantomData)
}

/// The unit returned by [`empty`] and [`complete`].
pub struct Empty<T>(PhantomData<fn() -> T>);

impl<T> Unit<T> for Empty<T> {
    fn subscribe(&self, observer: Arc<dyn UnitObserver<T>>) {
        settle(observer, Outcome::Completed);
    }
}

/// Creates a unit that succeeds with a clone of `value`.
pub fn just<T: Clone>(value: T) -> Just<T> {
    Just(value)
}

/// The unit returned by [`just`].
#[derive(Clone)]
pub struct Just<T>(T);

impl<T: Clone + Send + Sync> Unit<T> for Just<T> {
    fn subscribe(&self, observer: Arc<dyn UnitObserver<T>>) {
        settle(observer, Outcome::Succeeded(self.0.clone()));
    }
}

/// Creates a unit that fails with `error` right away.
pub fn fail<T>(error: Error) -> Fail<T> {
    Fail {
        error,
        _p: PhantomData,
    }
}

/// The unit returned by [`fail`].
pub struct Fail<T> {
    error: Error,
    _p: PhantomData<fn() -> T>,
}

impl<T> Unit<T> for Fail<T> {
    fn subscribe(&self, observer: Arc<dyn UnitObserver<T>>) {
        settle(observer, Outcome::Failed(self.error.clone()));
    }
}

/// Creates a unit that never settles.
pub fn never<T>() -> Never<T> {
    Never(PhantomData)
}

/// The unit returned by [`never`].
pub struct Never<T>(PhantomData<fn() -> T>);

impl<T> Unit<T> for Never<T> {
    fn subscribe(&self, observer: Arc<dyn UnitObserver<T>>) {
        observer.on_subscribe(Arc::new(Flag::default()));
    }
}

/// Creates a unit that calls `f` on every subscription and reports its result.
///
/// `Ok(None)` completes without a value.
pub fn from_fn<T, F>(f: F) -> FromFn<F>
where
    F: Fn() -> Result<Option<T>, Error>,
{
    FromFn(f)
}

/// The unit returned by [`from_fn`].
pub struct FromFn<F>(F);

impl<T, F> Unit<T> for FromFn<F>
where
    F: Fn() -> Result<Option<T>, Error> + Send + Sync,
{
    fn subscribe(&self, observer: Arc<dyn UnitObserver<T>>) {
        let flag = Arc::new(Flag::default());
        observer.on_subscribe(flag.clone());
        if flag.is_set() {
            return;
        }
        let outcome = match (self.0)() {
            Ok(Some(value)) => Outcome::Succeeded(value),
            Ok(None) => Outcome::Completed,
            Err(error) => Outcome::Failed(error),
        };
        if !flag.is_set() {
            observer.on_outcome(outcome);
        }
    }
}

/// A unit that subscribes to another unit from a [`Scheduler`].
///
/// Created by [`UnitExt::subscribe_on`][crate::UnitExt::subscribe_on].
pub struct SubscribeOn<U> {
    unit: Arc<U>,
    scheduler: Arc<dyn Scheduler>,
}

impl<U> SubscribeOn<U> {
    pub(crate) fn new(unit: U, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            unit: Arc::new(unit),
            scheduler,
        }
    }
}

impl<T, U> Unit<T> for SubscribeOn<U>
where
    T: Send + 'static,
    U: Unit<T> + 'static,
{
    fn subscribe(&self, observer: Arc<dyn UnitObserver<T>>) {
        let relay = Arc::new(Relay {
            downstream: observer.clone(),
            upstream: HandleCell::new(),
        });
        observer.on_subscribe(relay.clone());

        let unit = self.unit.clone();
        self.scheduler.schedule(Box::new(move || {
            if !relay.upstream.is_cancelled() {
                unit.subscribe(relay);
            }
        }));
    }
}

/// Forwards the outcome of a scheduled unit unless the downstream has cancelled.
struct Relay<T> {
    downstream: Arc<dyn UnitObserver<T>>,
    upstream: HandleCell<dyn Cancellable>,
}

impl<T> Cancellable for Relay<T> {
    fn cancel(&self) {
        self.upstream.cancel();
    }
}

impl<T> UnitObserver<T> for Relay<T> {
    fn on_subscribe(&self, handle: Arc<dyn Cancellable>) {
        self.upstream.set(handle);
    }

    fn on_outcome(&self, outcome: Outcome<T>) {
        if !self.upstream.is_cancelled() {
            self.downstream.on_outcome(outcome);
        }
    }
}
