//! Single-owner busy gate between the demultiplexer and the display
//!
//! The producer acquires the gate when it hands a ready set over; the
//! consumer releases it once it has drawn the set. Slots are only read by
//! the consumer while the gate is held.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared busy flag
///
/// Clones refer to the same flag.
#[derive(Debug, Clone, Default)]
pub struct BusyGate {
    busy: Arc<AtomicBool>,
}

impl BusyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark busy; false if it already was
    #[inline]
    pub fn try_acquire(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark idle; returns whether the gate was held
    #[inline]
    pub fn release(&self) -> bool {
        self.busy.swap(false, Ordering::AcqRel)
    }

    #[inline]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}
