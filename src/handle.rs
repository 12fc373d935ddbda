//! A set-once slot for a cancellation handle that may be cancelled before the handle arrives.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use arc_swap::ArcSwapOption;

use crate::Cancellable;

/// Holds the handle of an upstream operation (a [`Subscription`][crate::Subscription], or the
/// handle of a unit).
///
/// Cancelling the cell cancels the stored handle, or the handle stored later on. Either way, the
/// handle is released afterwards so that reference cycles between operators and their upstream
/// are broken.
pub(crate) struct HandleCell<H: ?Sized> {
    handle: ArcSwapOption<Arc<H>>,
    cancelled: AtomicBool,
}

impl<H: ?Sized + Cancellable> HandleCell<H> {
    pub fn new() -> Self {
        Self {
            handle: ArcSwapOption::empty(),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Stores `handle`.
    ///
    /// Returns `false` if the cell was cancelled or already held a handle; `handle` is cancelled
    /// in both cases.
    pub fn set(&self, handle: Arc<H>) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            handle.cancel();
            return false;
        }

        let empty: Option<Arc<Arc<H>>> = None;
        let prev = self
            .handle
            .compare_and_swap(&empty, Some(Arc::new(handle.clone())));
        if prev.is_some() {
            log::warn!("handle delivered more than once, cancelling the duplicate");
            handle.cancel();
            return false;
        }

        // `cancel` may have run between the check above and the store.
        if self.cancelled.load(Ordering::SeqCst) {
            self.cancel_stored();
            return false;
        }
        true
    }

    pub fn get(&self) -> Option<Arc<H>> {
        self.handle.load_full().map(|handle| Arc::clone(&*handle))
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel_stored();
    }

    /// Drops the stored handle without cancelling it, once the operation it controls is over.
    pub fn release(&self) {
        self.handle.store(None);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel_stored(&self) {
        if let Some(handle) = self.handle.swap(None) {
            handle.cancel();
        }
    }
}
