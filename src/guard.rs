//! Tracking of the single active unit of a switching operator.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use arc_swap::ArcSwapOption;

use crate::Cancellable;

/// Bit 0 of the state: the current generation's unit hasn't settled yet.
const ACTIVE: u64 = 1;

struct Active {
    generation: u64,
    handle: Arc<dyn Cancellable>,
}

/// Holds the handle of the current unit, tagged with a monotonically increasing generation.
///
/// Advancing the generation is what makes the previous unit stale: from that point on its signals
/// are recognized as outdated by [`GenerationGuard::retire`], even before its handle has been
/// cancelled.
pub(crate) struct GenerationGuard {
    /// `generation << 1 | ACTIVE`
    state: AtomicU64,
    current: ArcSwapOption<Active>,
    disposed: AtomicBool,
}

impl GenerationGuard {
    pub fn new() -> Self {
        Self {
            state: AtomicU64::new(0),
            current: ArcSwapOption::empty(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Starts a new generation and marks it active.
    ///
    /// Returns [`None`] if the guard has been disposed.
    pub fn advance(&self) -> Option<u64> {
        let mut state = self.state.load(Ordering::SeqCst);
        loop {
            if self.disposed.load(Ordering::SeqCst) {
                return None;
            }
            let generation = (state >> 1) + 1;
            match self.state.compare_exchange_weak(
                state,
                generation << 1 | ACTIVE,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Some(generation),
                Err(actual) => state = actual,
            }
        }
    }

    /// Installs the handle of `generation`'s unit and cancels the handle it replaces.
    ///
    /// If the guard is disposed concurrently, `handle` is cancelled as well.
    pub fn install(&self, generation: u64, handle: Arc<dyn Cancellable>) {
        let prev = self.current.swap(Some(Arc::new(Active { generation, handle })));
        if let Some(prev) = prev {
            prev.handle.cancel();
        }
        if self.disposed.load(Ordering::SeqCst) {
            self.cancel_current();
        }
    }

    /// Marks `generation`'s unit as settled.
    ///
    /// Returns `false` if a newer generation has been started since, making `generation` stale.
    pub fn retire(&self, generation: u64) -> bool {
        let retired = self
            .state
            .compare_exchange(
                generation << 1 | ACTIVE,
                generation << 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if retired {
            let current = self.current.load_full();
            if let Some(active) = &current {
                if active.generation == generation {
                    // Fails harmlessly if a newer unit got installed meanwhile.
                    let _ = self.current.compare_and_swap(&current, None::<Arc<Active>>);
                }
            }
        }
        retired
    }

    /// Returns `true` if the latest unit has settled (or none was ever started).
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.state.load(Ordering::SeqCst) & ACTIVE == 0
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.state.load(Ordering::SeqCst) >> 1
    }

    /// Cancels the current unit and refuses every later one.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.cancel_current();
    }

    fn cancel_current(&self) {
        if let Some(active) = self.current.swap(None) {
            active.handle.cancel();
        }
    }
}
