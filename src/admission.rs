//! The bounded admission window of the concatenating operators.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};

/// A bounded queue of requests waiting to be started, plus the bookkeeping that decides when to
/// ask the source for more.
///
/// The source is initially asked for `prefetch` items. Each settled request counts towards the
/// low-water mark `limit = prefetch - prefetch / 4`; once `limit` requests have settled, the same
/// number of items is requested again. Queued, active and requested-but-not-yet-arrived items
/// therefore never exceed `prefetch`, and a well-behaved source never finds the queue full.
pub(crate) struct AdmissionQueue<X> {
    sender: Sender<X>,
    receiver: Receiver<X>,
    prefetch: usize,
    limit: usize,
    settled: AtomicUsize,
}

impl<X> AdmissionQueue<X> {
    pub fn new(prefetch: usize) -> Self {
        assert_ne!(prefetch, 0, "prefetch must be at least 1");

        let (sender, receiver) = crossbeam_channel::bounded(prefetch);
        Self {
            sender,
            receiver,
            prefetch,
            limit: prefetch - (prefetch >> 2),
            settled: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn prefetch(&self) -> usize {
        self.prefetch
    }

    /// Enqueues `request`, handing it back if the window is exhausted.
    pub fn offer(&self, request: X) -> Result<(), X> {
        self.sender.try_send(request).map_err(|e| match e {
            TrySendError::Full(request) | TrySendError::Disconnected(request) => request,
        })
    }

    pub fn poll(&self) -> Option<X> {
        self.receiver.try_recv().ok()
    }

    pub fn clear(&self) {
        for request in self.receiver.try_iter() {
            drop(request);
        }
    }

    /// Records that a request has settled.
    ///
    /// Returns the number of items to request from the source if the low-water mark was reached.
    pub fn settle(&self) -> Option<usize> {
        let limit = self.limit;
        let prev = self
            .settled
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(if n + 1 == limit { 0 } else { n + 1 })
            })
            .unwrap_or_else(|n| n);
        (prev + 1 == limit).then_some(limit)
    }
}
