//! The work-in-progress counter that serializes drain loops.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts the drain requests that haven't been processed yet.
///
/// Any thread that changes an operator's state calls [`Wip::enter`]. Only the caller that moves
/// the counter away from 0 becomes the drainer; everyone else just leaves their increment behind,
/// which forces the drainer to go around its loop once more:
///
/// ```text
/// if !wip.enter() { return; }
/// let mut missed = 1;
/// loop {
///     /* process state */
///     missed = wip.leave(missed);
///     if missed == 0 { break; }
/// }
/// ```
///
/// A drainer that returns *without* calling [`Wip::leave`] keeps the counter above 0 forever,
/// which makes every later [`Wip::enter`] fail. Operators use that to become inert once they
/// have emitted their terminal signal.
pub(crate) struct Wip(AtomicUsize);

impl Wip {
    pub const fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    /// Registers a drain request. Returns `true` if the caller must drain.
    #[inline]
    pub fn enter(&self) -> bool {
        self.0.fetch_add(1, Ordering::AcqRel) == 0
    }

    /// Acknowledges `missed` processed requests, returning the number that arrived meanwhile.
    #[inline]
    pub fn leave(&self, missed: usize) -> usize {
        self.0.fetch_sub(missed, Ordering::AcqRel) - missed
    }
}
