//! Internal unit test utilities.

use std::{
    sync::{Arc, Barrier},
    thread,
    time::Duration,
};

use crate::{
    sync::{Condvar, Mutex},
    Cancellable, Error, ErrorHook, Outcome, Subscriber, Subscription, UnitObserver,
};

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TestError(pub &'static str);

/// Runs `a` and `b` on two threads that are released at the same time, and waits for both.
pub fn race<A, B>(a: A, b: B)
where
    A: FnOnce() + Send,
    B: FnOnce() + Send,
{
    let barrier = Barrier::new(2);
    thread::scope(|s| {
        s.spawn(|| {
            barrier.wait();
            a();
        });
        s.spawn(|| {
            barrier.wait();
            b();
        });
    });
}

#[derive(Default)]
pub struct Tracked {
    errors: Mutex<Vec<Error>>,
}

impl Tracked {
    pub fn errors(&self) -> Vec<Error> {
        self.errors.lock().clone()
    }
}

/// Returns a dedicated [`ErrorHook`] that records everything reported to it.
pub fn tracking_hook() -> (ErrorHook, Arc<Tracked>) {
    let tracked = Arc::new(Tracked::default());
    let t = tracked.clone();
    let hook = ErrorHook::new(move |error| t.errors.lock().push(error));
    (hook, tracked)
}

#[derive(Debug, Clone)]
pub enum Terminal {
    Completed,
    Failed(Error),
}

struct Record<T> {
    values: Vec<T>,
    terminals: Vec<Terminal>,
}

/// Records the signals it receives, both as a [`UnitObserver`] and as a [`Subscriber`].
///
/// A successful unit outcome is recorded as a value followed by [`Terminal::Completed`].
pub struct TestObserver<T> {
    record: Mutex<Record<T>>,
    condvar: Condvar,
    handle: Mutex<Option<Arc<dyn Cancellable>>>,
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    initial_request: usize,
}

impl<T: Send> TestObserver<T> {
    /// Creates an observer that requests an unbounded number of items when subscribed.
    pub fn new() -> Arc<Self> {
        Self::with_request(usize::MAX)
    }

    pub fn with_request(initial_request: usize) -> Arc<Self> {
        Arc::new(Self {
            record: Mutex::new(Record {
                values: Vec::new(),
                terminals: Vec::new(),
            }),
            condvar: Condvar::new(),
            handle: Mutex::new(None),
            subscription: Mutex::new(None),
            initial_request,
        })
    }

    pub fn values(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.record.lock().values.clone()
    }

    pub fn value_count(&self) -> usize {
        self.record.lock().values.len()
    }

    pub fn terminals(&self) -> Vec<Terminal> {
        self.record.lock().terminals.clone()
    }

    pub fn is_subscribed(&self) -> bool {
        self.handle.lock().is_some() || self.subscription.lock().is_some()
    }

    /// Blocks until a terminal signal arrives. Returns `false` on timeout.
    pub fn await_done(&self, timeout: Duration) -> bool {
        let guard = self.record.lock();
        let (guard, _) = self
            .condvar
            .wait_timeout_while(guard, timeout, |r| r.terminals.is_empty());
        !guard.terminals.is_empty()
    }

    pub fn cancel(&self) {
        let handle = self.handle.lock().clone();
        if let Some(handle) = handle {
            handle.cancel();
        }
        let subscription = self.subscription.lock().clone();
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }

    pub fn request(&self, n: usize) {
        let subscription = self.subscription.lock().clone();
        subscription
            .expect("observer was not subscribed to a source")
            .request(n);
    }

    #[track_caller]
    pub fn assert_completed(&self) {
        let terminals = self.terminals();
        assert!(
            matches!(terminals[..], [Terminal::Completed]),
            "expected a single completion, got {terminals:?}"
        );
    }

    /// Asserts that exactly one failure was received and returns it.
    #[track_caller]
    pub fn assert_failed(&self) -> Error {
        match &self.terminals()[..] {
            [Terminal::Failed(error)] => error.clone(),
            terminals => panic!("expected a single failure, got {terminals:?}"),
        }
    }

    #[track_caller]
    pub fn assert_not_terminated(&self) {
        let terminals = self.terminals();
        assert!(terminals.is_empty(), "unexpected terminal signal {terminals:?}");
    }

    fn push_terminal(&self, terminal: Terminal) {
        self.record.lock().terminals.push(terminal);
        self.condvar.notify_all();
    }
}

impl<T: Send> UnitObserver<T> for TestObserver<T> {
    fn on_subscribe(&self, handle: Arc<dyn Cancellable>) {
        let prev = self.handle.lock().replace(handle);
        assert!(prev.is_none(), "on_subscribe called twice");
    }

    fn on_outcome(&self, outcome: Outcome<T>) {
        match outcome {
            Outcome::Completed => self.push_terminal(Terminal::Completed),
            Outcome::Succeeded(value) => {
                self.record.lock().values.push(value);
                self.push_terminal(Terminal::Completed);
            }
            Outcome::Failed(error) => self.push_terminal(Terminal::Failed(error)),
        }
    }
}

impl<T: Send> Subscriber<T> for TestObserver<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        let prev = self.subscription.lock().replace(subscription.clone());
        assert!(prev.is_none(), "on_subscribe called twice");
        if self.initial_request != 0 {
            subscription.request(self.initial_request);
        }
    }

    fn on_next(&self, item: T) {
        self.record.lock().values.push(item);
    }

    fn on_error(&self, error: Error) {
        self.push_terminal(Terminal::Failed(error));
    }

    fn on_complete(&self) {
        self.push_terminal(Terminal::Completed);
    }
}

/// A generous timeout for tests that wait on other threads.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// A unit settled by hand, which delivers its outcome even after being cancelled.
pub struct ManualUnit<T> {
    observers: Mutex<Vec<Arc<dyn UnitObserver<T>>>>,
    cancelled: Arc<CancelCount>,
}

#[derive(Default)]
pub struct CancelCount(std::sync::atomic::AtomicUsize);

impl Cancellable for CancelCount {
    fn cancel(&self) {
        self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

impl<T> ManualUnit<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            observers: Mutex::new(Vec::new()),
            cancelled: Arc::new(CancelCount::default()),
        })
    }

    pub fn subscriptions(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.0.load(std::sync::atomic::Ordering::SeqCst) != 0
    }

    /// Delivers `outcome` to the most recent observer.
    pub fn settle(&self, outcome: Outcome<T>) {
        let observer = self.observers.lock().last().cloned();
        observer
            .expect("unit was never subscribed to")
            .on_outcome(outcome);
    }
}

impl<T> crate::Unit<T> for ManualUnit<T> {
    fn subscribe(&self, observer: Arc<dyn UnitObserver<T>>) {
        observer.on_subscribe(self.cancelled.clone());
        self.observers.lock().push(observer);
    }
}
