//! Bridges from item streams to single-signal units, for thread-based dataflow.
//!
//! (if you're looking for `async` streams, check out [`futures`] instead; this library is for code
//! that moves data between OS threads and wants the ordering and cancellation guarantees of
//! reactive operators without an executor)
//!
//! # Overview
//!
//! Two kinds of producers are involved: a [`Source`] pushes any number of items to a
//! [`Subscriber`] as they are requested, and a [`Unit`] reports exactly one [`Outcome`] to a
//! [`UnitObserver`]. Both hand their consumer a [`Cancellable`] handle first.
//!
//! The operators in this library turn a [`Source`] into something else by mapping every item to a
//! [`Unit`] and running those units:
//!
//! - [`SourceExt::concat_map_completable`] runs completion-only units one after another and
//!   completes once all of them (and the source) have.
//! - [`SourceExt::concat_map_maybe`] runs optional-value units one after another and emits their
//!   values in source order, as a new [`Source`].
//! - [`SourceExt::switch_map_completable`] runs only the unit of the latest item, cancelling the
//!   previous one.
//!
//! Each has a `_delay_error` variant that collects failures into a [`CompositeError`] instead of
//! giving up on the first one. See [`ErrorMode`] for the exact rules.
//!
//! [`UnitExt::materialize`] turns the outcome of a unit into a [`Notification`] value, and
//! [`UnitExt::subscribe_on`] moves a subscription onto a [`Scheduler`] such as a [`Worker`].
//!
//! ## Undeliverable errors
//!
//! Errors that show up after an operator has already terminated, or after it was cancelled, are
//! never dropped silently. They are reported to an [`ErrorHook`]: either one passed to the
//! operator's `undeliverable` method, or the process-wide hook set with
//! [`set_undeliverable_hook`]. Without a hook they are logged at error level.
//!
//! ## Promises and workers
//!
//! [`Promise`] is a [`Unit`] settled by hand, typically by a [`Worker`] thread that computed the
//! value. [`Worker`] is a wrapper around an OS-level thread that enforces *structured
//! concurrency*: when it's dropped, the thread is signaled to exit and joined, and if it has
//! panicked, the panic is forwarded to the thread dropping the [`Worker`].
//!
//! # Usage
//!
//! Running one unit of work per item, in order:
//!
//! ```
//! use std::sync::Arc;
//! use flatwewism::{
//!     source, unit, Cancellable, Error, Outcome, SourceExt, Unit, UnitObserver, DEFAULT_PREFETCH,
//! };
//!
//! struct Report(crossbeam_channel::Sender<Outcome<()>>);
//!
//! impl UnitObserver<()> for Report {
//!     fn on_subscribe(&self, _handle: Arc<dyn Cancellable>) {}
//!     fn on_outcome(&self, outcome: Outcome<()>) {
//!         self.0.send(outcome).ok();
//!     }
//! }
//!
//! let jobs = source::from_iter([1, 2, 3]).concat_map_completable(
//!     |n: i32| match n {
//!         1.. => Ok(unit::complete()),
//!         _ => Err(Error::msg("job numbers start at 1")),
//!     },
//!     DEFAULT_PREFETCH,
//! );
//!
//! let (sender, recv) = crossbeam_channel::unbounded();
//! jobs.subscribe(Arc::new(Report(sender)));
//! assert!(matches!(recv.recv().unwrap(), Outcome::Completed));
//! ```
//!
//! Offloading units to a [`Worker`] and collecting their values in source order:
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use flatwewism::{
//!     source, unit, Error, SourceExt, Source, Subscriber, Subscription, UnitExt, Worker,
//! };
//!
//! struct Collect(Mutex<Vec<u32>>, crossbeam_channel::Sender<()>);
//!
//! impl Subscriber<u32> for Collect {
//!     fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
//!         subscription.request(usize::MAX);
//!     }
//!     fn on_next(&self, item: u32) {
//!         self.0.lock().unwrap().push(item);
//!     }
//!     fn on_error(&self, _error: Error) {}
//!     fn on_complete(&self) {
//!         self.1.send(()).ok();
//!     }
//! }
//!
//! let worker = Arc::new(Worker::builder().name("squares").spawn().unwrap());
//! let squares = source::from_iter(0..6u32).concat_map_maybe(
//!     move |n: u32| {
//!         // Odd numbers complete without a value and are skipped.
//!         let unit = unit::from_fn(move || Ok((n % 2 == 0).then_some(n * n)));
//!         Ok(unit.subscribe_on(worker.clone()))
//!     },
//!     2,
//! );
//!
//! let (sender, recv) = crossbeam_channel::bounded(1);
//! let collect = Arc::new(Collect(Mutex::default(), sender));
//! squares.subscribe(collect.clone());
//! recv.recv().unwrap();
//! assert_eq!(*collect.0.lock().unwrap(), [0, 4, 16]);
//! ```
//!
//! [`futures`]: https://crates.io/crates/futures

mod admission;
mod capture;
mod concat;
mod drain;
mod error;
mod ext;
mod flow;
mod guard;
mod handle;
mod hook;
mod materialize;
mod promise;
mod scheduler;
pub mod source;
mod switch;
mod sync;
#[cfg(test)]
mod test;
pub mod unit;

pub use capture::ErrorMode;
pub use concat::{ConcatMapCompletable, ConcatMapMaybe, DEFAULT_PREFETCH};
pub use error::{CompositeError, Error};
pub use ext::{SourceExt, UnitExt};
pub use flow::{Cancellable, Outcome, Source, Subscriber, Subscription, Unit, UnitObserver};
pub use hook::{reset_undeliverable_hook, set_undeliverable_hook, ErrorHook};
pub use materialize::{Materialize, Notification};
pub use promise::{promise, Promise, PromiseHandle};
pub use scheduler::{Scheduler, Task, Worker, WorkerBuilder, WorkerSet, WorkerSetBuilder};
pub use switch::SwitchMapCompletable;
pub use unit::SubscribeOn;
