//! Switching bridge: map every source item to a completion-only unit, keeping only the latest one.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};

use crate::{
    capture::{ErrorMode, Errors},
    concat::Mapper,
    guard::GenerationGuard,
    handle::HandleCell,
    Cancellable, Error, ErrorHook, Outcome, Source, Subscriber, Subscription, Unit, UnitObserver,
};

/// The state of one subscription to a [`SwitchMapCompletable`].
struct Switch<T> {
    this: Weak<Self>,
    mapper: Arc<Mapper<T, ()>>,
    downstream: Arc<dyn UnitObserver<()>>,
    /// [`ErrorMode::Immediate`] or [`ErrorMode::End`].
    mode: ErrorMode,
    errors: Errors,
    hook: ErrorHook,
    upstream: HandleCell<dyn Subscription>,
    guard: GenerationGuard,
    done: AtomicBool,
    disposed: AtomicBool,
}

impl<T: Send + 'static> Switch<T> {
    fn new(
        mapper: Arc<Mapper<T, ()>>,
        downstream: Arc<dyn UnitObserver<()>>,
        mode: ErrorMode,
        hook: ErrorHook,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            mapper,
            downstream,
            mode,
            errors: Errors::new(mode, hook.clone()),
            hook,
            upstream: HandleCell::new(),
            guard: GenerationGuard::new(),
            done: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        })
    }

    fn inner_outcome(&self, generation: u64, outcome: Outcome<()>) {
        let current = self.guard.retire(generation);
        match outcome {
            Outcome::Completed | Outcome::Succeeded(()) => {
                if current && self.done.load(Ordering::SeqCst) {
                    self.finish();
                }
            }
            Outcome::Failed(error) => {
                if self.disposed.load(Ordering::SeqCst) {
                    self.hook.report(error);
                } else if !current {
                    log::trace!("switch: generation {generation} failed after being replaced");
                    match self.mode {
                        ErrorMode::Immediate => self.hook.report(error),
                        _ => {
                            self.errors.record(error);
                        }
                    }
                } else if self.mode == ErrorMode::Immediate {
                    if self.errors.record(error) {
                        self.upstream.cancel();
                        self.finish();
                    }
                } else {
                    self.errors.record(error);
                    if self.done.load(Ordering::SeqCst) {
                        self.finish();
                    }
                }
            }
        }
    }

    /// Completes or fails the downstream, whichever the collected errors call for.
    fn finish(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.upstream.cancel();
        self.guard.dispose();

        let error = self.errors.terminate();
        log::debug!(
            "switch: terminating after {} generations (failed: {})",
            self.guard.generation(),
            error.is_some()
        );
        self.downstream.on_outcome(match error {
            Some(error) => Outcome::Failed(error),
            None => Outcome::Completed,
        });
    }
}

impl<T: Send + 'static> Subscriber<T> for Switch<T> {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        if self.upstream.set(subscription.clone()) {
            subscription.request(usize::MAX);
        }
    }

    fn on_next(&self, item: T) {
        if self.done.load(Ordering::SeqCst) || self.disposed.load(Ordering::SeqCst) {
            return;
        }

        let unit = match (self.mapper)(item) {
            Ok(unit) => unit,
            Err(error) => {
                self.upstream.cancel();
                self.on_error(error);
                return;
            }
        };
        let Some(parent) = self.this.upgrade() else {
            return;
        };
        let Some(generation) = self.guard.advance() else {
            return;
        };
        log::trace!("switch: starting generation {generation}");

        let inner = Arc::new(SwitchInner {
            parent,
            generation,
            handle: HandleCell::new(),
            settled: AtomicBool::new(false),
        });
        self.guard.install(generation, inner.clone());
        unit.subscribe(inner);
    }

    fn on_error(&self, error: Error) {
        if self.done.load(Ordering::SeqCst) || self.disposed.load(Ordering::SeqCst) {
            self.hook.report(error);
            return;
        }
        if !self.errors.record(error) {
            return;
        }
        if self.mode == ErrorMode::Immediate {
            self.done.store(true, Ordering::SeqCst);
            self.finish();
        } else {
            self.on_complete();
        }
    }

    fn on_complete(&self) {
        self.done.store(true, Ordering::SeqCst);
        if self.guard.is_idle() {
            self.finish();
        }
    }
}

impl<T: Send + 'static> Cancellable for Switch<T> {
    fn cancel(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!("switch: cancelled");
        self.upstream.cancel();
        self.guard.dispose();
        if let Some(error) = self.errors.terminate() {
            self.hook.report(error);
        }
    }
}

/// Observes the unit of one generation.
struct SwitchInner<T> {
    parent: Arc<Switch<T>>,
    generation: u64,
    handle: HandleCell<dyn Cancellable>,
    settled: AtomicBool,
}

impl<T: Send + 'static> Cancellable for SwitchInner<T> {
    fn cancel(&self) {
        self.handle.cancel();
    }
}

impl<T: Send + 'static> UnitObserver<()> for SwitchInner<T> {
    fn on_subscribe(&self, handle: Arc<dyn Cancellable>) {
        self.handle.set(handle);
    }

    fn on_outcome(&self, outcome: Outcome<()>) {
        if self.settled.swap(true, Ordering::SeqCst) {
            log::warn!("switch: generation {} settled more than once", self.generation);
            if let Outcome::Failed(error) = outcome {
                self.parent.hook.report(error);
            }
            return;
        }
        self.handle.release();
        self.parent.inner_outcome(self.generation, outcome);
    }
}

/// A completion-only unit that maps each item of a source to a completion-only unit, cancelling
/// the unit of the previous item.
///
/// It completes once the source has completed and the unit of the last item has completed.
///
/// Created by [`SourceExt::switch_map_completable`][crate::SourceExt::switch_map_completable] and
/// [`SourceExt::switch_map_completable_delay_error`][crate::SourceExt::switch_map_completable_delay_error].
pub struct SwitchMapCompletable<S, T> {
    source: S,
    mapper: Arc<Mapper<T, ()>>,
    mode: ErrorMode,
    hook: ErrorHook,
}

impl<S, T> SwitchMapCompletable<S, T> {
    pub(crate) fn new(source: S, mapper: Arc<Mapper<T, ()>>, delay_errors: bool) -> Self {
        Self {
            source,
            mapper,
            mode: if delay_errors {
                ErrorMode::End
            } else {
                ErrorMode::Immediate
            },
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

impl<S, T> Unit<()> for SwitchMapCompletable<S, T>
where
    S: Source<T>,
    T: Send + 'static,
{
    fn subscribe(&self, observer: Arc<dyn UnitObserver<()>>) {
        let state = Switch::new(
            self.mapper.clone(),
            observer.clone(),
            self.mode,
            self.hook.clone(),
        );
        observer.on_subscribe(state.clone());
        self.source.subscribe(state);
    }
}
