//! Error capture for the bridging operators.
//!
//! Eager operators funnel failures through an [`ErrorCell`], which accepts exactly one error.
//! Delay-error operators append them to an [`ErrorAggregator`] and report them all at the end.
//! Errors that can't be accepted anymore are passed to the operator's [`ErrorHook`].

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, OnceLock,
};

use arc_swap::{ArcSwapOption, Guard};

use crate::{Error, ErrorHook};

/// When an operator reports the failures it observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMode {
    /// The first failure terminates the operation right away.
    Immediate,
    /// Failures are collected; the operation terminates once the active unit has settled, without
    /// starting any further queued unit.
    Boundary,
    /// Failures are collected; the operation terminates once the source is done and every unit
    /// has settled.
    End,
}

impl ErrorMode {
    pub(crate) fn delayed(till_the_end: bool) -> Self {
        if till_the_end {
            Self::End
        } else {
            Self::Boundary
        }
    }
}

/// A single slot for the terminal error.
///
/// The first captured error wins. Losers, and errors captured after [`ErrorCell::terminate`], are
/// reported to the hook.
pub(crate) struct ErrorCell {
    error: OnceLock<Error>,
    terminated: AtomicBool,
    /// Set by whoever takes responsibility for delivering the captured error.
    claimed: AtomicBool,
    hook: ErrorHook,
}

impl ErrorCell {
    pub fn new(hook: ErrorHook) -> Self {
        Self {
            error: OnceLock::new(),
            terminated: AtomicBool::new(false),
            claimed: AtomicBool::new(false),
            hook,
        }
    }

    /// Tries to make `error` the terminal error.
    ///
    /// Returns `false` if another error got there first or the cell was already terminated; the
    /// error has then been passed to the hook.
    pub fn capture(&self, error: Error) -> bool {
        if self.terminated.load(Ordering::SeqCst) {
            self.hook.report(error);
            return false;
        }
        if let Err(error) = self.error.set(error) {
            self.hook.report(error);
            return false;
        }
        // If the owner terminated concurrently, it may or may not have seen our error. `claimed`
        // decides who reports it.
        if self.terminated.load(Ordering::SeqCst) && !self.claimed.swap(true, Ordering::SeqCst) {
            if let Some(error) = self.error.get() {
                self.hook.report(error.clone());
            }
            return false;
        }
        true
    }

    #[inline]
    pub fn has_error(&self) -> bool {
        self.error.get().is_some()
    }

    /// Closes the cell and returns the captured error, unless it has been reported elsewhere.
    pub fn terminate(&self) -> Option<Error> {
        self.terminated.store(true, Ordering::SeqCst);
        let error = self.error.get()?;
        if self.claimed.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(error.clone())
    }
}

/// An append-only, arrival-ordered collection of errors.
///
/// The collected errors live in a single slot that [`ErrorAggregator::terminate`] empties in one
/// swap, so every error pushed before that swap is returned by it and every error pushed after it
/// goes to the hook.
pub(crate) struct ErrorAggregator {
    /// [`None`] once terminated.
    errors: ArcSwapOption<Vec<Error>>,
    hook: ErrorHook,
}

impl ErrorAggregator {
    pub fn new(hook: ErrorHook) -> Self {
        Self {
            errors: ArcSwapOption::from_pointee(Vec::new()),
            hook,
        }
    }

    /// Appends `error`. Returns `false` if the aggregator has been terminated, in which case the
    /// error went to the hook.
    pub fn push(&self, error: Error) -> bool {
        let mut current = self.errors.load_full();
        loop {
            let Some(errors) = &current else {
                self.hook.report(error);
                return false;
            };
            let mut next = Vec::with_capacity(errors.len() + 1);
            next.extend(errors.iter().cloned());
            next.push(error.clone());

            let prev = self.errors.compare_and_swap(&current, Some(Arc::new(next)));
            let swapped = match (&*prev, &current) {
                (Some(prev), Some(current)) => Arc::ptr_eq(prev, current),
                _ => false,
            };
            if swapped {
                return true;
            }
            current = Guard::into_inner(prev);
        }
    }

    #[inline]
    pub fn has_error(&self) -> bool {
        match &*self.errors.load() {
            Some(errors) => !errors.is_empty(),
            None => false,
        }
    }

    /// Closes the aggregator and returns everything collected so far as a single error.
    ///
    /// Later calls return [`None`].
    pub fn terminate(&self) -> Option<Error> {
        let errors = self.errors.swap(None)?;
        let errors = Arc::try_unwrap(errors).unwrap_or_else(|errors| errors.to_vec());
        Error::from_errors(errors)
    }
}

/// The error state of one composed operation.
pub(crate) enum Errors {
    Eager(ErrorCell),
    Delayed(ErrorAggregator),
}

impl Errors {
    pub fn new(mode: ErrorMode, hook: ErrorHook) -> Self {
        match mode {
            ErrorMode::Immediate => Self::Eager(ErrorCell::new(hook)),
            ErrorMode::Boundary | ErrorMode::End => Self::Delayed(ErrorAggregator::new(hook)),
        }
    }

    /// Records a failure. Returns `false` if the failure was redirected to the hook instead, in
    /// which case the caller must not act on it.
    pub fn record(&self, error: Error) -> bool {
        match self {
            Self::Eager(cell) => cell.capture(error),
            Self::Delayed(aggregator) => aggregator.push(error),
        }
    }

    pub fn has_error(&self) -> bool {
        match self {
            Self::Eager(cell) => cell.has_error(),
            Self::Delayed(aggregator) => aggregator.has_error(),
        }
    }

    /// Stops accepting errors and returns the error to deliver downstream, if any.
    ///
    /// Only the first call can return an error. Errors recorded after it go to the hook.
    pub fn terminate(&self) -> Option<Error> {
        match self {
            Self::Eager(cell) => cell.terminate(),
            Self::Delayed(aggregator) => aggregator.terminate(),
        }
    }
}
