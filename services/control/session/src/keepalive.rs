//! Consecutive keep-alive failure counter.
//!
//! Shared between the timer tick, the transport's receive path, and the
//! async request runner without a lock.

use std::sync::atomic::{AtomicU32, Ordering};

/// Number of consecutive keep-alive failures that ends the connection
pub const KEEP_ALIVE_FAILURE_THRESHOLD: u32 = 3;

/// Counts consecutive keep-alive failures
#[derive(Debug, Default)]
pub struct KeepAliveCounter {
    failures: AtomicU32,
}

impl KeepAliveCounter {
    /// Create a counter at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one failure
    pub fn increment(&self) {
        self.failures.fetch_add(1, Ordering::AcqRel);
    }

    /// Forget all recorded failures
    pub fn reset(&self) {
        self.failures.store(0, Ordering::Release);
    }

    /// Clear the counter and report whether it held exactly `bound`.
    ///
    /// When the value does not match it is added back, so failures recorded
    /// concurrently are not lost. This is a one-shot trigger at `bound`, not a
    /// greater-or-equal test: each failure must be followed by one check.
    pub fn has_reached(&self, bound: u32) -> bool {
        let value = self.failures.swap(0, Ordering::AcqRel);
        if value == bound {
            return true;
        }
        self.failures.fetch_add(value, Ordering::AcqRel);
        false
    }

    /// Current number of recorded failures
    pub fn value(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }
}
