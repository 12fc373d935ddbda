//! Concatenating bridges: map every source item to a unit and run the units one after another.
//!
//! [`ConcatMapCompletable`] waits for completion-only units and reports a single outcome.
//! [`ConcatMapMaybe`] forwards the payload of every optional-value unit that has one, in source
//! order, as a new [`Source`].
//!
//! Both share one state machine, `Concat`. Source items are mapped as they arrive and the
//! resulting requests are queued in an [`AdmissionQueue`]; a drain loop starts them one at a time,
//! forwards payloads when the downstream has demand for them, and emits the terminal signal.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering},
    Arc, Weak,
};

use arc_swap::ArcSwapOption;
use crossbeam_channel::{Receiver, Sender};

use crate::{
    admission::AdmissionQueue,
    capture::{ErrorMode, Errors},
    drain::Wip,
    handle::HandleCell,
    Cancellable, Error, ErrorHook, Outcome, Source, Subscriber, Subscription, Unit, UnitObserver,
};

/// The prefetch used by callers that have no better idea.
pub const DEFAULT_PREFETCH: usize = 2;

pub(crate) type Mapper<T, R> = dyn Fn(T) -> Result<Arc<dyn Unit<R>>, Error> + Send + Sync;

/// Erases the unit type returned by a user mapper.
pub(crate) fn erase_mapper<T, R, U, F>(mapper: F) -> Arc<Mapper<T, R>>
where
    T: 'static,
    R: 'static,
    F: Fn(T) -> Result<U, Error> + Send + Sync + 'static,
    U: Unit<R> + 'static,
{
    Arc::new(move |item| mapper(item).map(|unit| Arc::new(unit) as Arc<dyn Unit<R>>))
}

/// No unit is running.
const IDLE: u8 = 0;
/// A unit has been started and hasn't settled.
const ACTIVE: u8 = 1;
/// A unit succeeded, its payload waits in `Concat::item` for downstream demand.
const READY: u8 = 2;

/// A mapped source item, waiting to be started.
struct Request<R> {
    index: u64,
    unit: Result<Arc<dyn Unit<R>>, Error>,
}

/// Holds at most one payload.
struct Slot<R> {
    sender: Sender<R>,
    receiver: Receiver<R>,
}

impl<R> Slot<R> {
    fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        Self { sender, receiver }
    }

    fn put(&self, item: R) {
        if self.sender.try_send(item).is_err() {
            log::warn!("concat: payload slot already occupied, dropping payload");
        }
    }

    fn take(&self) -> Option<R> {
        self.receiver.try_recv().ok()
    }
}

enum Downstream<R> {
    Completion(Arc<dyn UnitObserver<()>>),
    Stream(Arc<dyn Subscriber<R>>),
}

/// The state of one subscription to a concatenating operator.
///
/// `Concat` is also the subscriber of the outer source and the cancellation handle given to the
/// downstream.
struct Concat<T, R> {
    this: Weak<Self>,
    mapper: Arc<Mapper<T, R>>,
    downstream: Downstream<R>,
    mode: ErrorMode,
    errors: Errors,
    hook: ErrorHook,
    queue: AdmissionQueue<Request<R>>,
    upstream: HandleCell<dyn Subscription>,
    inner: ArcSwapOption<ConcatInner<T, R>>,
    state: AtomicU8,
    /// Payload of the last unit, handed from the unit's thread to the drainer via `state`.
    item: Slot<R>,
    /// The outer source has terminated.
    done: AtomicBool,
    /// Cancelled, or the terminal signal has been emitted.
    disposed: AtomicBool,
    wip: Wip,
    /// Downstream demand, `Stream` only.
    requested: AtomicUsize,
    /// Payloads emitted so far. Only touched by the drainer.
    emitted: AtomicUsize,
    /// Sequence position of the next source item. Only touched by the outer source.
    index: AtomicU64,
}

impl<T: Send + 'static, R: Send + 'static> Concat<T, R> {
    fn new(
        mapper: Arc<Mapper<T, R>>,
        downstream: Downstream<R>,
        mode: ErrorMode,
        prefetch: usize,
        hook: ErrorHook,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            mapper,
            downstream,
            mode,
            errors: Errors::new(mode, hook.clone()),
            hook,
            queue: AdmissionQueue::new(prefetch),
            upstream: HandleCell::new(),
            inner: ArcSwapOption::empty(),
            state: AtomicU8::new(IDLE),
            item: Slot::new(),
            done: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            wip: Wip::new(),
            requested: AtomicUsize::new(0),
            emitted: AtomicUsize::new(0),
            index: AtomicU64::new(0),
        })
    }

    fn inner_outcome(&self, index: u64, outcome: Outcome<R>) {
        self.inner.store(None);
        self.replenish();

        match outcome {
            Outcome::Succeeded(value) if matches!(self.downstream, Downstream::Stream(_)) => {
                self.item.put(value);
                self.state.store(READY, Ordering::SeqCst);
            }
            Outcome::Completed | Outcome::Succeeded(_) => {
                self.state.store(IDLE, Ordering::SeqCst);
            }
            Outcome::Failed(error) => {
                log::trace!("concat: unit #{index} failed");
                self.inner_error(error);
            }
        }
        self.drain();
    }

    fn inner_error(&self, error: Error) {
        if self.disposed.load(Ordering::SeqCst) {
            self.hook.report(error);
        } else if self.errors.record(error) && self.mode != ErrorMode::End {
            self.upstream.cancel();
        }
        self.state.store(IDLE, Ordering::SeqCst);
    }

    fn cancel_inner(&self) {
        if let Some(inner) = self.inner.swap(None) {
            inner.cancel();
        }
    }

    fn drain(&self) {
        if !self.wip.enter() {
            return;
        }

        let mut missed = 1;
        loop {
            loop {
                if self.disposed.load(Ordering::SeqCst) {
                    // Stay inert.
                    self.clear();
                    return;
                }

                let state = self.state.load(Ordering::SeqCst);
                if self.errors.has_error()
                    && (self.mode == ErrorMode::Immediate
                        || (self.mode == ErrorMode::Boundary && state == IDLE))
                {
                    self.finish();
                    return;
                }

                match state {
                    IDLE => {
                        let done = self.done.load(Ordering::SeqCst);
                        match self.queue.poll() {
                            None if done => {
                                self.finish();
                                return;
                            }
                            None => break,
                            Some(request) => self.start(request),
                        }
                    }
                    READY => {
                        let emitted = self.emitted.load(Ordering::Relaxed);
                        if emitted == self.requested.load(Ordering::SeqCst) {
                            break;
                        }
                        let item = self.item.take();
                        if let (Some(item), Downstream::Stream(subscriber)) =
                            (item, &self.downstream)
                        {
                            subscriber.on_next(item);
                        }
                        self.emitted.store(emitted + 1, Ordering::Relaxed);
                        self.state.store(IDLE, Ordering::SeqCst);
                    }
                    _ => break,
                }
            }

            missed = self.wip.leave(missed);
            if missed == 0 {
                break;
            }
        }
    }

    /// Starts `request`. Called by the drainer while idle.
    fn start(&self, request: Request<R>) {
        let Request { index, unit } = request;
        match unit {
            Ok(unit) => {
                // The drainer is running on behalf of a live subscription.
                let Some(parent) = self.this.upgrade() else {
                    return;
                };
                log::trace!("concat: starting unit #{index}");
                self.state.store(ACTIVE, Ordering::SeqCst);
                let inner = Arc::new(ConcatInner {
                    parent,
                    index,
                    handle: HandleCell::new(),
                    settled: AtomicBool::new(false),
                });
                self.inner.store(Some(inner.clone()));
                if self.disposed.load(Ordering::SeqCst) {
                    self.cancel_inner();
                    return;
                }
                unit.subscribe(inner);
            }
            Err(error) => {
                // A failed mapping behaves like a unit failing right after being started.
                log::trace!("concat: mapping #{index} failed");
                self.replenish();
                self.inner_error(error);
            }
        }
    }

    /// Counts a settled request, asking the source for more at the low-water mark.
    fn replenish(&self) {
        if let Some(n) = self.queue.settle() {
            if let Some(upstream) = self.upstream.get() {
                upstream.request(n);
            }
        }
    }

    /// Emits the terminal signal. Called by the drainer only.
    fn finish(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.upstream.cancel();
        self.cancel_inner();
        self.clear();

        let error = self.errors.terminate();
        log::debug!("concat: terminating (failed: {})", error.is_some());
        match (&self.downstream, error) {
            (Downstream::Completion(observer), None) => observer.on_outcome(Outcome::Completed),
            (Downstream::Completion(observer), Some(error)) => {
                observer.on_outcome(Outcome::Failed(error))
            }
            (Downstream::Stream(subscriber), None) => subscriber.on_complete(),
            (Downstream::Stream(subscriber), Some(error)) => subscriber.on_error(error),
        }
    }

    fn clear(&self) {
        self.queue.clear();
        self.item.take();
    }
}

impl<T: Send + 'static, R: Send + 'static> Subscriber<T> for Concat<T, R> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.upstream.set(subscription.clone()) {
            subscription.request(self.queue.prefetch());
        }
    }

    fn on_next(&self, item: T) {
        if self.done.load(Ordering::SeqCst) || self.disposed.load(Ordering::SeqCst) {
            return;
        }

        let index = self.index.fetch_add(1, Ordering::Relaxed);
        let request = Request {
            index,
            unit: (self.mapper)(item),
        };
        if self.queue.offer(request).is_err() {
            self.upstream.cancel();
            self.on_error(Error::Overflow(self.queue.prefetch()));
            return;
        }
        self.drain();
    }

    fn on_error(&self, error: Error) {
        if self.done.load(Ordering::SeqCst) || self.disposed.load(Ordering::SeqCst) {
            self.hook.report(error);
            return;
        }
        if self.errors.record(error) {
            if self.mode == ErrorMode::Immediate {
                self.cancel_inner();
            }
            self.done.store(true, Ordering::SeqCst);
            self.drain();
        }
    }

    fn on_complete(&self) {
        self.done.store(true, Ordering::SeqCst);
        self.drain();
    }
}

impl<T: Send + 'static, R: Send + 'static> Cancellable for Concat<T, R> {
    fn cancel(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!("concat: cancelled");
        self.upstream.cancel();
        self.cancel_inner();
        if let Some(error) = self.errors.terminate() {
            self.hook.report(error);
        }
        if self.wip.enter() {
            self.clear();
        }
    }
}

impl<T: Send + 'static, R: Send + 'static> Subscription for Concat<T, R> {
    fn request(&self, n: usize) {
        if n == 0 {
            log::warn!("concat: ignoring request for 0 items");
            return;
        }
        let _ = self
            .requested
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| {
                Some(r.saturating_add(n))
            });
        self.drain();
    }
}

/// Observes the unit started for one queued request.
struct ConcatInner<T, R> {
    parent: Arc<Concat<T, R>>,
    index: u64,
    handle: HandleCell<dyn Cancellable>,
    settled: AtomicBool,
}

impl<T: Send + 'static, R: Send + 'static> Cancellable for ConcatInner<T, R> {
    fn cancel(&self) {
        self.handle.cancel();
    }
}

impl<T: Send + 'static, R: Send + 'static> UnitObserver<R> for ConcatInner<T, R> {
    fn on_subscribe(&self, handle: Arc<dyn Cancellable>) {
        self.handle.set(handle);
    }

    fn on_outcome(&self, outcome: Outcome<R>) {
        if self.settled.swap(true, Ordering::SeqCst) {
            log::warn!("concat: unit #{} settled more than once", self.index);
            if let Outcome::Failed(error) = outcome {
                self.parent.hook.report(error);
            }
            return;
        }
        self.handle.release();
        self.parent.inner_outcome(self.index, outcome);
    }
}

/// A completion-only unit that maps each item of a source to a completion-only unit and runs
/// those units one after another, in item order.
///
/// Created by [`SourceExt::concat_map_completable`][crate::SourceExt::concat_map_completable] and
/// [`SourceExt::concat_map_completable_delay_error`][crate::SourceExt::concat_map_completable_delay_error].
pub struct ConcatMapCompletable<S, T> {
    source: S,
    mapper: Arc<Mapper<T, ()>>,
    mode: ErrorMode,
    prefetch: usize,
    hook: ErrorHook,
}

impl<S, T> ConcatMapCompletable<S, T> {
    pub(crate) fn new(
        source: S,
        mapper: Arc<Mapper<T, ()>>,
        mode: ErrorMode,
        prefetch: usize,
    ) -> Self {
        assert_ne!(prefetch, 0, "prefetch must be at least 1");
        Self {
            source,
            mapper,
            mode,
            prefetch,
            hook: ErrorHook::global(),
        }
    }

    /// Sends errors that can't be delivered downstream to `hook` instead of the process-wide hook.
    pub fn undeliverable(self, hook: ErrorHook) -> Self {
        Self { hook, ..self }
    }

    #[inline]
    pub fn error_mode(&self) -> ErrorMode {
        self.mode
    }
}

impl<S, T> Unit<()> for ConcatMapCompletable<S, T>
where
    S: Source<T>,
    T: Send + 'static,
{
    fn subscribe(&self, observer: Arc<dyn UnitObserver<()>>) {
        let state = Concat::new(
            self.mapper.clone(),
            Downstream::Completion(observer.clone()),
            self.mode,
            self.prefetch,
            self.hook.clone(),
        );
        observer.on_subscribe(state.clone());
        self.source.subscribe(state);
    }
}

/// A source that maps each item of another source to an optional-value unit, runs those units one
/// after another, and emits their values in item order.
///
/// Created by [`SourceExt::concat_map_maybe`][crate::SourceExt::concat_map_maybe] and
/// [`SourceExt::concat_map_maybe_delay_error`][crate::SourceExt::concat_map_maybe_delay_error].
pub struct ConcatMapMaybe<S, T, R> {
    source: S,
    mapper: Arc<Mapper<T, R>>,
    mode: ErrorMode,
    prefetch: usize,
    hook: ErrorHook,
}

impl<S, T, R> ConcatMapMaybe<S, T, R> {
    pub(crate) fn new(
        source: S,
        mapper: Arc<Mapper<T, R>>,
        mode: ErrorMode,
        prefetch: usize,
    ) -> Self {
        assert_ne!(prefetch, 0, "prefetch must be at least 1");
        Self {
            source,
            mapper,
            mode,
            prefetch,
            hook: ErrorHook::global(),
        }
    }

    /// Sends errors that can't be delivered downstream to `hook` instead of the process-wide hook.
    pub fn undeliverable(self, hook: ErrorHook) -> Self {
        Self { hook, ..self }
    }

    #[inline]
    pub fn error_mode(&self) -> ErrorMode {
        self.mode
    }
}

impl<S, T, R> Source<R> for ConcatMapMaybe<S, T, R>
where
    S: Source<T>,
    T: Send + 'static,
    R: Send + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<R>>) {
        let state = Concat::new(
            self.mapper.clone(),
            Downstream::Stream(subscriber.clone()),
            self.mode,
            self.prefetch,
            self.hook.clone(),
        );
        subscriber.on_subscribe(state.clone());
        self.source.subscribe(state);
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        promise,
        source::{self, Publisher},
        test::{race, tracking_hook, ManualUnit, TestError, TestObserver},
        unit, PromiseHandle, SourceExt, UnitExt,
    };

    use super::*;

    fn handles(n: usize) -> (Vec<crate::Promise<()>>, Vec<PromiseHandle<()>>) {
        (0..n).map(|_| promise::<()>()).unzip()
    }

    #[test]
    fn runs_units_one_at_a_time_in_order() {
        let (promises, units) = handles(3);
        let units = Arc::new(units);
        let u = units.clone();
        let op = source::from_iter(0..3usize)
            .concat_map_completable(move |i: usize| Ok(u[i].clone()), DEFAULT_PREFETCH);
        let observer = TestObserver::<()>::new();
        op.subscribe(observer.clone());

        for (i, promise) in promises.into_iter().enumerate() {
            for (j, unit) in units.iter().enumerate() {
                assert_eq!(unit.has_observers(), i == j, "unit {j} while {i} runs");
            }
            observer.assert_not_terminated();
            promise.complete();
        }
        observer.assert_completed();
    }

    #[test]
    fn immediate_units_complete_in_order() {
        let order = Arc::new(crate::sync::Mutex::new(Vec::new()));
        let o = order.clone();
        let op = source::from_iter(0..100).concat_map_completable(
            move |i: i32| {
                let o = o.clone();
                Ok(unit::from_fn(move || {
                    o.lock().push(i);
                    Ok(None)
                }))
            },
            4,
        );
        let observer = TestObserver::<()>::new();
        op.subscribe(observer.clone());
        observer.assert_completed();
        assert_eq!(*order.lock(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn empty_source_completes() {
        let observer = TestObserver::<()>::new();
        source::empty::<u8>()
            .concat_map_completable(|_| Ok(unit::complete()), 1)
            .subscribe(observer.clone());
        observer.assert_completed();
    }

    #[test]
    fn eager_inner_failure() {
        let publisher = Publisher::new();
        let (mut promises, units) = handles(2);
        let units = Arc::new(units);
        let u = units.clone();
        let observer = TestObserver::<()>::new();
        publisher
            .clone()
            .concat_map_completable(move |i: usize| Ok(u[i].clone()), DEFAULT_PREFETCH)
            .subscribe(observer.clone());

        publisher.next(0);
        publisher.next(1);
        assert!(units[0].has_observers());
        assert!(!units[1].has_observers());

        let second = promises.pop().unwrap();
        promises.pop().unwrap().complete();
        assert!(units[1].has_observers());

        let error = Error::new(TestError("unit 2"));
        second.fail(error.clone());
        assert!(observer.assert_failed().ptr_eq(&error));
        assert!(!publisher.has_subscribers());
    }

    #[test]
    fn eager_outer_failure_cancels_active_unit() {
        let publisher = Publisher::new();
        let unit = ManualUnit::<()>::new();
        let u = unit.clone();
        let observer = TestObserver::<()>::new();
        publisher
            .clone()
            .concat_map_completable(move |_: u8| Ok(u.clone()), DEFAULT_PREFETCH)
            .subscribe(observer.clone());

        publisher.next(0);
        publisher.next(1);
        let error = Error::new(TestError("outer"));
        publisher.fail(error.clone());
        assert!(observer.assert_failed().ptr_eq(&error));
        assert!(unit.is_cancelled());
        // The queued item was discarded.
        assert_eq!(unit.subscriptions(), 1);
    }

    #[test]
    fn mapping_failure_is_a_unit_failure() {
        let error = Error::new(TestError("mapper"));
        let e = error.clone();
        let observer = TestObserver::<()>::new();
        source::from_iter(0..5)
            .concat_map_completable(
                move |i: i32| {
                    if i == 2 {
                        Err(e.clone())
                    } else {
                        Ok(unit::complete())
                    }
                },
                DEFAULT_PREFETCH,
            )
            .subscribe(observer.clone());
        assert!(observer.assert_failed().ptr_eq(&error));
    }

    #[test]
    fn boundary_stops_before_next_queued_unit() {
        let publisher = Publisher::new();
        let first = ManualUnit::<()>::new();
        let second = ManualUnit::<()>::new();
        let (f, s) = (first.clone(), second.clone());
        let observer = TestObserver::<()>::new();
        publisher
            .clone()
            .concat_map_completable_delay_error(
                move |i: u8| Ok(if i == 0 { f.clone() } else { s.clone() }),
                false,
                DEFAULT_PREFETCH,
            )
            .subscribe(observer.clone());

        publisher.next(0);
        publisher.next(1);
        let error = Error::new(TestError("boundary"));
        first.settle(Outcome::Failed(error.clone()));
        assert!(observer.assert_failed().ptr_eq(&error));
        assert_eq!(second.subscriptions(), 0);
        assert!(!publisher.has_subscribers());
    }

    #[test]
    fn boundary_lets_active_unit_finish() {
        let publisher = Publisher::new();
        let unit = ManualUnit::<()>::new();
        let u = unit.clone();
        let observer = TestObserver::<()>::new();
        publisher
            .clone()
            .concat_map_completable_delay_error(move |_: u8| Ok(u.clone()), false, 2)
            .subscribe(observer.clone());

        publisher.next(0);
        let error = Error::new(TestError("outer"));
        publisher.fail(error.clone());
        observer.assert_not_terminated();
        assert!(!unit.is_cancelled());

        unit.settle(Outcome::Completed);
        assert!(observer.assert_failed().ptr_eq(&error));
    }

    #[test]
    fn end_mode_aggregates_every_failure() {
        let observer = TestObserver::<()>::new();
        source::from_iter(["a", "b", "c"])
            .concat_map_completable_delay_error(
                |name: &'static str| Ok(unit::fail(Error::new(TestError(name)))),
                true,
                DEFAULT_PREFETCH,
            )
            .subscribe(observer.clone());

        let error = observer.assert_failed();
        let composite = error.as_composite().unwrap();
        let names: Vec<_> = composite
            .errors()
            .iter()
            .map(|e| e.downcast_ref::<TestError>().unwrap().0)
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn end_mode_single_failure_is_unwrapped() {
        let error = Error::new(TestError("only"));
        let e = error.clone();
        let observer = TestObserver::<()>::new();
        source::from_iter(0..4)
            .concat_map_completable_delay_error(
                move |i: i32| {
                    let e = e.clone();
                    Ok(unit::from_fn(move || match i {
                        1 => Err(e.clone()),
                        _ => Ok(None),
                    }))
                },
                true,
                1,
            )
            .subscribe(observer.clone());
        assert!(observer.assert_failed().ptr_eq(&error));
    }

    #[test]
    fn end_mode_keeps_consuming_the_source() {
        let publisher = Publisher::new();
        let first = ManualUnit::<()>::new();
        let second = ManualUnit::<()>::new();
        let (f, s) = (first.clone(), second.clone());
        let observer = TestObserver::<()>::new();
        publisher
            .clone()
            .concat_map_completable_delay_error(
                move |i: u8| Ok(if i == 0 { f.clone() } else { s.clone() }),
                true,
                DEFAULT_PREFETCH,
            )
            .subscribe(observer.clone());

        publisher.next(0);
        let error = Error::new(TestError("first"));
        first.settle(Outcome::Failed(error.clone()));
        observer.assert_not_terminated();
        assert!(publisher.has_subscribers());

        publisher.next(1);
        assert_eq!(second.subscriptions(), 1);
        second.settle(Outcome::Completed);
        observer.assert_not_terminated();

        publisher.complete();
        assert!(observer.assert_failed().ptr_eq(&error));
    }

    #[test]
    fn replenishes_source_at_low_water_mark() {
        let publisher = Publisher::new();
        let unit = ManualUnit::<()>::new();
        let u = unit.clone();
        let observer = TestObserver::<()>::new();
        publisher
            .clone()
            .concat_map_completable(move |_: u8| Ok(u.clone()), 4)
            .subscribe(observer.clone());
        assert_eq!(publisher.requested(), 4);

        // limit = 4 - 4 / 4 = 3
        for i in 0..3 {
            publisher.next(i);
            unit.settle(Outcome::Completed);
        }
        assert_eq!(publisher.requested(), 7);
    }

    #[test]
    fn overflowing_source_fails() {
        let publisher = Publisher::new();
        let unit = ManualUnit::<()>::new();
        let u = unit.clone();
        let (hook, tracked) = tracking_hook();
        let observer = TestObserver::<()>::new();
        publisher
            .clone()
            .concat_map_completable(move |_: u8| Ok(u.clone()), 1)
            .undeliverable(hook)
            .subscribe(observer.clone());

        // One active, one queued, one too many.
        publisher.next(0);
        publisher.next(1);
        publisher.next(2);
        assert!(matches!(observer.assert_failed(), Error::Overflow(1)));
        assert!(unit.is_cancelled());
        assert!(tracked.errors().is_empty());
    }

    #[test]
    fn cancel_is_idempotent_and_silences_terminal() {
        let publisher = Publisher::new();
        let unit = ManualUnit::<()>::new();
        let u = unit.clone();
        let (hook, tracked) = tracking_hook();
        let observer = TestObserver::<()>::new();
        publisher
            .clone()
            .concat_map_completable(move |_: u8| Ok(u.clone()), DEFAULT_PREFETCH)
            .undeliverable(hook)
            .subscribe(observer.clone());

        publisher.next(0);
        observer.cancel();
        observer.cancel();
        assert!(!publisher.has_subscribers());
        assert!(unit.is_cancelled());

        // A late failure of the cancelled unit is undeliverable.
        unit.settle(Outcome::Failed(Error::new(TestError("late"))));
        publisher.complete();
        observer.assert_not_terminated();
        assert_eq!(tracked.errors().len(), 1);
    }

    #[test]
    fn cancel_reports_collected_errors() {
        let publisher = Publisher::new();
        let unit = ManualUnit::<()>::new();
        let u = unit.clone();
        let (hook, tracked) = tracking_hook();
        let observer = TestObserver::<()>::new();
        publisher
            .clone()
            .concat_map_completable_delay_error(move |_: u8| Ok(u.clone()), true, 2)
            .undeliverable(hook)
            .subscribe(observer.clone());

        publisher.next(0);
        let error = Error::new(TestError("collected"));
        unit.settle(Outcome::Failed(error.clone()));
        observer.cancel();

        observer.assert_not_terminated();
        let reported = tracked.errors();
        assert_eq!(reported.len(), 1);
        assert!(reported[0].ptr_eq(&error));
    }

    #[test]
    fn cancel_after_termination_has_no_effect() {
        let (hook, tracked) = tracking_hook();
        let observer = TestObserver::<()>::new();
        source::from_iter(0..2)
            .concat_map_completable(|_| Ok(unit::complete()), 1)
            .undeliverable(hook)
            .subscribe(observer.clone());
        observer.assert_completed();
        observer.cancel();
        observer.assert_completed();
        assert!(tracked.errors().is_empty());
    }

    #[test]
    fn outer_and_inner_failure_race() {
        for _ in 0..200 {
            let (hook, tracked) = tracking_hook();
            let unit = ManualUnit::<()>::new();
            let u = unit.clone();
            let observer = TestObserver::<()>::new();
            let state = Concat::new(
                erase_mapper(move |_: u8| Ok(u.clone())),
                Downstream::Completion(observer.clone()),
                ErrorMode::Immediate,
                DEFAULT_PREFETCH,
                hook,
            );
            state.on_next(0);
            assert_eq!(unit.subscriptions(), 1);

            let outer = Error::new(TestError("outer"));
            let inner = Error::new(TestError("inner"));
            let (s, o, i) = (state.clone(), outer.clone(), inner.clone());
            race(
                move || s.on_error(o),
                move || unit.settle(Outcome::Failed(i)),
            );

            let delivered = observer.assert_failed();
            let reported = tracked.errors();
            assert_eq!(reported.len(), 1);
            if delivered.ptr_eq(&outer) {
                assert!(reported[0].ptr_eq(&inner));
            } else {
                assert!(delivered.ptr_eq(&inner));
                assert!(reported[0].ptr_eq(&outer));
            }
        }
    }

    #[test]
    fn cancel_and_complete_race() {
        for _ in 0..200 {
            let unit = ManualUnit::<()>::new();
            let u = unit.clone();
            let observer = TestObserver::<()>::new();
            let state = Concat::new(
                erase_mapper(move |_: u8| Ok(u.clone())),
                Downstream::Completion(observer.clone()),
                ErrorMode::Immediate,
                DEFAULT_PREFETCH,
                ErrorHook::global(),
            );
            state.on_next(0);
            state.on_complete();

            let s = state.clone();
            race(move || s.cancel(), move || unit.settle(Outcome::Completed));
            // Either cancellation won and nothing is delivered, or completion won.
            assert!(observer.terminals().len() <= 1);
            assert_eq!(observer.value_count(), 0);
        }
    }

    #[test]
    fn maybe_emits_values_in_order_skipping_empty_units() {
        let observer = TestObserver::<i32>::new();
        source::from_iter(0..6)
            .concat_map_maybe(
                |i: i32| Ok(unit::from_fn(move || Ok((i % 2 == 0).then_some(i)))),
                DEFAULT_PREFETCH,
            )
            .subscribe(observer.clone());
        assert_eq!(observer.values(), [0, 2, 4]);
        observer.assert_completed();
    }

    #[test]
    fn payload_slot_holds_one_value() {
        let slot = Slot::new();
        assert_eq!(slot.take(), None);
        slot.put(1);
        slot.put(2);
        assert_eq!(slot.take(), Some(1));
        assert_eq!(slot.take(), None);

        // Filled from another thread, emptied here.
        let slot = Arc::new(Slot::new());
        let s = slot.clone();
        std::thread::spawn(move || s.put("value")).join().unwrap();
        assert_eq!(slot.take(), Some("value"));
    }

    #[test]
    fn maybe_waits_for_downstream_demand() {
        let observer = TestObserver::<i32>::with_request(1);
        source::from_iter(1..4)
            .concat_map_maybe(|i: i32| Ok(unit::just(i * 10)), 1)
            .subscribe(observer.clone());
        assert_eq!(observer.values(), [10]);
        observer.assert_not_terminated();

        observer.request(1);
        assert_eq!(observer.values(), [10, 20]);
        observer.request(5);
        assert_eq!(observer.values(), [10, 20, 30]);
        observer.assert_completed();
    }

    #[test]
    fn maybe_values_from_other_threads() {
        let worker = Arc::new(crate::Worker::builder().spawn().unwrap());
        let w = worker.clone();
        let observer = TestObserver::<u32>::new();
        source::from_iter(0..50u32)
            .concat_map_maybe(
                move |i: u32| Ok(unit::just(i).subscribe_on(w.clone())),
                DEFAULT_PREFETCH,
            )
            .subscribe(observer.clone());
        assert!(observer.await_done(crate::test::TIMEOUT));
        assert_eq!(observer.values(), (0..50).collect::<Vec<_>>());
        observer.assert_completed();
    }

    #[test]
    fn maybe_boundary_delivers_pending_value() {
        let publisher = Publisher::new();
        let observer = TestObserver::<u8>::with_request(0);
        publisher
            .clone()
            .concat_map_maybe_delay_error(|i: u8| Ok(unit::just(i)), false, DEFAULT_PREFETCH)
            .subscribe(observer.clone());

        publisher.next(7);
        let error = Error::new(TestError("outer"));
        publisher.fail(error.clone());
        observer.assert_not_terminated();

        observer.request(1);
        assert_eq!(observer.values(), [7]);
        assert!(observer.assert_failed().ptr_eq(&error));
    }

    #[test]
    fn maybe_eager_failure_drops_pending_value() {
        let publisher = Publisher::new();
        let observer = TestObserver::<u8>::with_request(0);
        publisher
            .clone()
            .concat_map_maybe(|i: u8| Ok(unit::just(i)), DEFAULT_PREFETCH)
            .subscribe(observer.clone());

        publisher.next(7);
        let error = Error::new(TestError("outer"));
        publisher.fail(error.clone());
        assert!(observer.values().is_empty());
        assert!(observer.assert_failed().ptr_eq(&error));
    }

    #[test]
    #[should_panic(expected = "prefetch must be at least 1")]
    fn zero_prefetch() {
        let _ = source::never::<u8>().concat_map_completable(|_| Ok(unit::complete()), 0);
    }
}
