//! Basic [`Source`] implementations.

use std::{
    iter::Peekable,
    mem,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Weak,
    },
};

use crate::{sync::Mutex, Cancellable, Error, Source, Subscriber, Subscription};

/// A subscription that ignores everything.
struct Inert;

impl Cancellable for Inert {
    fn cancel(&self) {}
}

impl Subscription for Inert {
    fn request(&self, _: usize) {}
}

fn add_demand(requested: &AtomicUsize, n: usize) -> usize {
    requested
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| {
            Some(r.saturating_add(n))
        })
        .unwrap_or_else(|r| r)
}

/// Creates a cold [`Source`] that emits the items of `iter`, honoring demand.
///
/// Every subscription iterates its own clone of `iter`. Completion is signaled as soon as the
/// last item has been emitted, without waiting for further demand.
pub fn from_iter<I>(iter: I) -> FromIter<I>
where
    I: IntoIterator + Clone,
{
    FromIter { iter }
}

/// The [`Source`] returned by [`from_iter`].
#[derive(Clone)]
pub struct FromIter<I> {
    iter: I,
}

impl<I> Source<I::Item> for FromIter<I>
where
    I: IntoIterator + Clone + Send + Sync + 'static,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
{
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<I::Item>>) {
        let emission = Arc::new(IterEmission {
            iter: Mutex::new(self.iter.clone().into_iter().peekable()),
            subscriber: subscriber.clone(),
            requested: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
            done: AtomicBool::new(false),
        });
        subscriber.on_subscribe(emission.clone());
        if emission.is_exhausted() {
            emission.complete();
        }
    }
}

struct IterEmission<It: Iterator> {
    iter: Mutex<Peekable<It>>,
    subscriber: Arc<dyn Subscriber<It::Item>>,
    requested: AtomicUsize,
    cancelled: AtomicBool,
    done: AtomicBool,
}

impl<It: Iterator> IterEmission<It> {
    fn is_exhausted(&self) -> bool {
        self.iter.lock().peek().is_none()
    }

    fn complete(&self) {
        if !self.cancelled.load(Ordering::SeqCst) && !self.done.swap(true, Ordering::SeqCst) {
            self.subscriber.on_complete();
        }
    }

    /// Emits up to `requested` items, then keeps going as long as demand was added meanwhile.
    ///
    /// Only the thread that raised demand from 0 runs this.
    fn emit(&self, mut requested: usize) {
        let mut emitted = 0;
        loop {
            while emitted != requested {
                if self.cancelled.load(Ordering::SeqCst) {
                    return;
                }
                let (item, exhausted) = {
                    let mut iter = self.iter.lock();
                    let item = iter.next();
                    (item, iter.peek().is_none())
                };
                let Some(item) = item else {
                    self.complete();
                    return;
                };
                self.subscriber.on_next(item);
                if exhausted {
                    self.complete();
                    return;
                }
                emitted += 1;
            }

            requested = self.requested.load(Ordering::Acquire);
            if requested == emitted {
                requested = self.requested.fetch_sub(emitted, Ordering::AcqRel) - emitted;
                if requested == 0 {
                    return;
                }
                emitted = 0;
            }
        }
    }
}

impl<It> Cancellable for IterEmission<It>
where
    It: Iterator + Send,
    It::Item: Send,
{
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl<It> Subscription for IterEmission<It>
where
    It: Iterator + Send,
    It::Item: Send,
{
    fn request(&self, n: usize) {
        if n == 0 {
            log::warn!("ignoring request for 0 items");
            return;
        }
        if add_demand(&self.requested, n) == 0 {
            self.emit(n);
        }
    }
}

/// Creates a [`Source`] that fails every subscriber with `error` right away.
pub fn fail<T>(error: Error) -> Fail<T> {
    Fail {
        error,
        _p: std::marker::PhantomData,
    }
}

/// The [`Source`] returned by [`fail`].
pub struct Fail<T> {
    error: Error,
    _p: std::marker::PhantomData<fn() -> T>,
}

impl<T> Source<T> for Fail<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        subscriber.on_subscribe(Arc::new(Inert));
        subscriber.on_error(self.error.clone());
    }
}

/// Creates a [`Source`] that completes every subscriber right away.
pub fn empty<T>() -> Empty<T> {
    Empty(std::marker::PhantomData)
}

/// The [`Source`] returned by [`empty`].
pub struct Empty<T>(std::marker::PhantomData<fn() -> T>);

impl<T> Source<T> for Empty<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        subscriber.on_subscribe(Arc::new(Inert));
        subscriber.on_complete();
    }
}

/// Creates a [`Source`] that never signals anything after `on_subscribe`.
pub fn never<T>() -> Never<T> {
    Never(std::marker::PhantomData)
}

/// The [`Source`] returned by [`never`].
pub struct Never<T>(std::marker::PhantomData<fn() -> T>);

impl<T> Source<T> for Never<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        subscriber.on_subscribe(Arc::new(Inert));
    }
}

#[derive(Clone)]
enum Ended {
    Completed,
    Failed(Error),
}

struct PublisherState<T> {
    subscribers: Vec<Arc<Publication<T>>>,
    ended: Option<Ended>,
}

struct PublisherInner<T> {
    state: Mutex<PublisherState<T>>,
    next_id: AtomicU64,
}

/// A hot [`Source`] driven by hand.
///
/// Items are broadcast to whoever is subscribed at the time of [`Publisher::next`], regardless of
/// their demand; the demand is only tracked so that it can be inspected. Subscribers arriving after
/// [`Publisher::complete`] or [`Publisher::fail`] receive the terminal signal right away.
pub struct Publisher<T> {
    inner: Arc<PublisherInner<T>>,
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Publisher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Publisher<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                state: Mutex::new(PublisherState {
                    subscribers: Vec::new(),
                    ended: None,
                }),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Returns `true` if at least one subscriber is attached and hasn't cancelled.
    pub fn has_subscribers(&self) -> bool {
        !self.inner.state.lock().subscribers.is_empty()
    }

    /// Returns the demand of all current subscribers, saturating at [`usize::MAX`].
    ///
    /// Demand is not reduced by [`Publisher::next`].
    pub fn requested(&self) -> usize {
        self.inner
            .state
            .lock()
            .subscribers
            .iter()
            .fold(0, |acc, s| acc.saturating_add(s.requested.load(Ordering::Acquire)))
    }

    /// Emits `item` to every current subscriber.
    pub fn next(&self, item: T)
    where
        T: Clone,
    {
        for publication in self.snapshot() {
            if !publication.cancelled.load(Ordering::SeqCst) {
                publication.subscriber.on_next(item.clone());
            }
        }
    }

    pub fn complete(&self) {
        self.end(Ended::Completed);
    }

    pub fn fail(&self, error: Error) {
        self.end(Ended::Failed(error));
    }

    fn snapshot(&self) -> Vec<Arc<Publication<T>>> {
        self.inner.state.lock().subscribers.clone()
    }

    fn end(&self, ended: Ended) {
        let subscribers = {
            let mut state = self.inner.state.lock();
            if state.ended.is_some() {
                log::warn!("publisher terminated twice");
                return;
            }
            state.ended = Some(ended.clone());
            mem::take(&mut state.subscribers)
        };
        for publication in subscribers {
            publication.end(ended.clone());
        }
    }
}

impl<T: Send + 'static> Source<T> for Publisher<T> {
    fn subscribe(&self, subscriber: Arc<dyn Subscriber<T>>) {
        let publication = Arc::new(Publication {
            publisher: Arc::downgrade(&self.inner),
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            subscriber: subscriber.clone(),
            requested: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
        });
        subscriber.on_subscribe(publication.clone());

        let ended = {
            let mut state = self.inner.state.lock();
            if state.ended.is_none() && !publication.cancelled.load(Ordering::SeqCst) {
                state.subscribers.push(publication.clone());
            }
            state.ended.clone()
        };
        match ended {
            Some(ended) => publication.end(ended),
            // Cancelled while being registered.
            None if publication.cancelled.load(Ordering::SeqCst) => publication.remove(),
            None => {}
        }
    }
}

/// One subscriber of a [`Publisher`].
struct Publication<T> {
    publisher: Weak<PublisherInner<T>>,
    id: u64,
    subscriber: Arc<dyn Subscriber<T>>,
    requested: AtomicUsize,
    cancelled: AtomicBool,
}

impl<T> Publication<T> {
    fn end(&self, ended: Ended) {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        match ended {
            Ended::Completed => self.subscriber.on_complete(),
            Ended::Failed(error) => self.subscriber.on_error(error),
        }
    }

    fn remove(&self) {
        let Some(publisher) = self.publisher.upgrade() else {
            return;
        };
        let removed = {
            let mut state = publisher.state.lock();
            state
                .subscribers
                .iter()
                .position(|p| p.id == self.id)
                .map(|i| state.subscribers.remove(i))
        };
        drop(removed);
    }
}

impl<T: Send> Cancellable for Publication<T> {
    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.remove();
        }
    }
}

impl<T: Send> Subscription for Publication<T> {
    fn request(&self, n: usize) {
        if n == 0 {
            log::warn!("ignoring request for 0 items");
            return;
        }
        add_demand(&self.requested, n);
    }
}
