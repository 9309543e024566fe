//! Dispatcher counters and the point-in-time snapshot handed to callers.
//!
//! The pending count doubles as the admission gate: a place is reserved atomically before a load
//! enters the collector and handed back when the cadence loop extracts it.
//!
//! ```
//! use priority_dispatcher::{Dispatcher, DispatcherConfig};
//!
//! let config = DispatcherConfig { admission_capacity: 2, ..Default::default() };
//! let dispatcher = Dispatcher::<u32>::new(config, |_: u32| async {}).unwrap();
//! for id in 0..3 {
//!     dispatcher.submit(1, id);
//! }
//!
//! let metrics = dispatcher.metrics();
//! assert_eq!((metrics.submitted, metrics.rejected, metrics.pending), (3, 1, 2));
//! ```

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Live counters, shared between submitters, the cadence loop and the executions it spawns.
#[derive(Debug, Default)]
pub(crate) struct Metrics {
    pub submitted: AtomicU64,
    pub rejected: AtomicU64,
    pub released: AtomicU64,
    pub processed: AtomicU64,
    pub panicked: AtomicU64,
    /// Loads released since the last minute boundary
    pub minute_counter: AtomicU64,
    /// Admission places taken: loads waiting in the collector, or about to be
    pub pending: AtomicUsize,
}

impl Metrics {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Take one admission place, unless all `capacity` of them are in use.
    pub fn try_admit(&self, capacity: usize) -> bool {
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| {
                (pending < capacity).then_some(pending + 1)
            })
            .is_ok()
    }

    pub fn release_place(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn reset_minute(&self) -> u64 {
        self.minute_counter.swap(0, Ordering::SeqCst)
    }

    pub fn snapshot(&self, in_flight: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            submitted: self.submitted.load(Ordering::SeqCst),
            rejected: self.rejected.load(Ordering::SeqCst),
            released: self.released.load(Ordering::SeqCst),
            processed: self.processed.load(Ordering::SeqCst),
            panicked: self.panicked.load(Ordering::SeqCst),
            in_flight,
            pending: self.pending.load(Ordering::SeqCst),
            released_this_minute: self.minute_counter.load(Ordering::SeqCst),
        }
    }
}

/// A point-in-time copy of the dispatcher's counters.
///
/// Each field is read independently, so a snapshot taken while work is moving may be off by
/// the handful of loads that changed state during the read.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Every call to `submit`, accepted or not
    pub submitted: u64,
    /// Dropped by a rule, a full admission buffer, or a stopped dispatcher
    pub rejected: u64,
    /// Handed to the executor
    pub released: u64,
    /// Executions that ran to completion
    pub processed: u64,
    /// Executions that panicked
    pub panicked: u64,
    pub in_flight: usize,
    pub pending: usize,
    pub released_this_minute: u64,
}
