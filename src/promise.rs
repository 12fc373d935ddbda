use std::{
    mem,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use crate::{
    sync::{Condvar, Mutex},
    Cancellable, Error, Outcome, Unit, UnitObserver,
};

/// Creates a connected pair of [`Promise`] and [`PromiseHandle`].
pub fn promise<T: Clone>() -> (Promise<T>, PromiseHandle<T>) {
    let inner = Arc::new(PromiseInner {
        state: Mutex::new(PromiseState::Pending(Vec::new())),
        condvar: Condvar::new(),
        next_id: AtomicU64::new(0),
    });
    (
        Promise {
            inner: inner.clone(),
            settled: false,
        },
        PromiseHandle { inner },
    )
}

type Observers<T> = Vec<(u64, Arc<dyn UnitObserver<T>>)>;

enum PromiseState<T> {
    Pending(Observers<T>),
    Settled(Outcome<T>),
}

struct PromiseInner<T> {
    state: Mutex<PromiseState<T>>,
    condvar: Condvar,
    next_id: AtomicU64,
}

impl<T: Clone> PromiseInner<T> {
    fn settle(&self, outcome: Outcome<T>) {
        let observers = {
            let mut state = self.state.lock();
            match mem::replace(&mut *state, PromiseState::Settled(outcome.clone())) {
                PromiseState::Pending(observers) => observers,
                PromiseState::Settled(_) => unreachable!("promise settled twice"),
            }
        };
        self.condvar.notify_all();

        for (_, observer) in observers {
            observer.on_outcome(outcome.clone());
        }
    }
}

/// An empty slot that can be settled with an [`Outcome`], once.
///
/// Settling a [`Promise`] delivers the outcome to every observer subscribed to the connected
/// [`PromiseHandle`], and to every observer subscribing later on. A connected pair of [`Promise`]
/// and [`PromiseHandle`] can be created by calling [`promise`].
///
/// Dropping a [`Promise`] without settling it fails it with [`Error::PromiseDropped`].
pub struct Promise<T: Clone> {
    inner: Arc<PromiseInner<T>>,
    settled: bool,
}

impl<T: Clone> Drop for Promise<T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        self.inner.settle(Outcome::Failed(Error::PromiseDropped));
    }
}

impl<T: Clone> Promise<T> {
    /// Settles the promise with a value, consuming it.
    pub fn succeed(self, value: T) {
        self.settle(Outcome::Succeeded(value));
    }

    /// Settles the promise without a value, consuming it.
    pub fn complete(self) {
        self.settle(Outcome::Completed);
    }

    /// Fails the promise, consuming it.
    pub fn fail(self, error: Error) {
        self.settle(Outcome::Failed(error));
    }

    pub fn settle(mut self, outcome: Outcome<T>) {
        self.settled = true;
        self.inner.settle(outcome);
    }
}

/// A [`Unit`] connected to a [`Promise`] that will eventually settle.
///
/// A connected pair of [`Promise`] and [`PromiseHandle`] can be created by calling [`promise`].
pub struct PromiseHandle<T> {
    inner: Arc<PromiseInner<T>>,
}

impl<T> Clone for PromiseHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone> PromiseHandle<T> {
    /// Blocks the calling thread until the connected [`Promise`] is settled, or `timeout` elapses.
    ///
    /// Returns [`None`] on timeout.
    pub fn block(&self, timeout: Duration) -> Option<Outcome<T>> {
        let state = self.inner.state.lock();
        let (state, _) = self
            .inner
            .condvar
            .wait_timeout_while(state, timeout, |state| {
                matches!(state, PromiseState::Pending(_))
            });
        match &*state {
            PromiseState::Pending(_) => None,
            PromiseState::Settled(outcome) => Some(outcome.clone()),
        }
    }

    /// Tests whether the connected [`Promise`] is still waiting to be settled.
    pub fn will_block(&self) -> bool {
        matches!(*self.inner.state.lock(), PromiseState::Pending(_))
    }

    /// Returns `true` if at least one observer is waiting for the outcome.
    pub fn has_observers(&self) -> bool {
        match &*self.inner.state.lock() {
            PromiseState::Pending(observers) => !observers.is_empty(),
            PromiseState::Settled(_) => false,
        }
    }
}

impl<T: Clone + Send + 'static> Unit<T> for PromiseHandle<T> {
    fn subscribe(&self, observer: Arc<dyn UnitObserver<T>>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let observation = Arc::new(PromiseObservation {
            inner: Arc::downgrade(&self.inner),
            id,
            cancelled: AtomicBool::new(false),
        });
        observer.on_subscribe(observation.clone());
        if observation.cancelled.load(Ordering::SeqCst) {
            return;
        }

        let settled = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                PromiseState::Pending(observers) => {
                    observers.push((id, observer.clone()));
                    None
                }
                PromiseState::Settled(outcome) => Some(outcome.clone()),
            }
        };
        match settled {
            Some(outcome) => observer.on_outcome(outcome),
            // Cancelled while being registered.
            None if observation.cancelled.load(Ordering::SeqCst) => observation.remove(),
            None => {}
        }
    }
}

/// Removes its observer from the promise when cancelled.
struct PromiseObservation<T> {
    inner: Weak<PromiseInner<T>>,
    id: u64,
    cancelled: AtomicBool,
}

impl<T> PromiseObservation<T> {
    fn remove(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        // Drop the observer outside of the lock.
        let removed = {
            let mut state = inner.state.lock();
            match &mut *state {
                PromiseState::Pending(observers) => observers
                    .iter()
                    .position(|(id, _)| *id == self.id)
                    .map(|i| observers.remove(i)),
                PromiseState::Settled(_) => None,
            }
        };
        drop(removed);
    }
}

impl<T: Send> Cancellable for PromiseObservation<T> {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.remove();
    }
}
