//! Frame counters for the channel demultiplexer
//!
//! # Design Principles (KISS)
//! - Lock-free atomic counters for hot path (zero overhead on data path)
//! - Simple snapshot mechanism for reporting
//! - Shared via `Arc` between the producer task and whoever reports

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters updated by the demultiplexer
///
/// All operations use Relaxed ordering. Statistics are eventually
/// consistent, which is acceptable for monitoring.
#[derive(Debug, Default)]
pub struct DemuxCounters {
    /// Frames submitted
    pub received: AtomicU64,
    /// Frames sorted into a channel slot
    pub stored: AtomicU64,
    /// Ready events emitted
    pub ready: AtomicU64,
    /// Frames on a virtual channel other than the data channel
    pub ignored: AtomicU64,
    /// Frames dropped because the header could not be decoded
    pub decode_errors: AtomicU64,
    /// Frames dropped because channel bits were out of range
    pub unknown_channel: AtomicU64,
    /// Frames stored with fewer samples than declared
    pub truncated: AtomicU64,
    /// Submissions with a complete round held back by the minimum spacing
    pub rate_limited: AtomicU64,
    /// Frames stored while the consumer was busy
    pub busy_suppressed: AtomicU64,
    /// Busy flags cleared by timeout instead of the consumer
    pub busy_timeouts: AtomicU64,
    /// Trigger times that jumped backwards past the spacing (new run)
    pub clock_resets: AtomicU64,
    /// Bytes submitted
    pub bytes: AtomicU64,
}

macro_rules! counter_inc {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            #[inline]
            pub fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl DemuxCounters {
    /// Create new zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    counter_inc! {
        inc_received => received,
        inc_stored => stored,
        inc_ready => ready,
        inc_ignored => ignored,
        inc_decode_errors => decode_errors,
        inc_unknown_channel => unknown_channel,
        inc_truncated => truncated,
        inc_rate_limited => rate_limited,
        inc_busy_suppressed => busy_suppressed,
        inc_busy_timeouts => busy_timeouts,
        inc_clock_resets => clock_resets,
    }

    /// Add to bytes counter
    #[inline]
    pub fn add_bytes(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Take a snapshot of current values
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            received: self.received.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            ready: self.ready.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            unknown_channel: self.unknown_channel.load(Ordering::Relaxed),
            truncated: self.truncated.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            busy_suppressed: self.busy_suppressed.load(Ordering::Relaxed),
            busy_timeouts: self.busy_timeouts.load(Ordering::Relaxed),
            clock_resets: self.clock_resets.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        for counter in [
            &self.received,
            &self.stored,
            &self.ready,
            &self.ignored,
            &self.decode_errors,
            &self.unknown_channel,
            &self.truncated,
            &self.rate_limited,
            &self.busy_suppressed,
            &self.busy_timeouts,
            &self.clock_resets,
            &self.bytes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of counter values at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CounterSnapshot {
    pub received: u64,
    pub stored: u64,
    pub ready: u64,
    pub ignored: u64,
    pub decode_errors: u64,
    pub unknown_channel: u64,
    pub truncated: u64,
    pub rate_limited: u64,
    pub busy_suppressed: u64,
    pub busy_timeouts: u64,
    pub clock_resets: u64,
    pub bytes: u64,
}

impl CounterSnapshot {
    /// Frames dropped for any reason
    pub fn dropped(&self) -> u64 {
        self.decode_errors + self.unknown_channel
    }

    /// Frames per second between two snapshots
    pub fn frame_rate_from(&self, prev: &CounterSnapshot, elapsed_secs: f64) -> f64 {
        if elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.received.saturating_sub(prev.received) as f64 / elapsed_secs
    }

    /// Bytes per second formatted as human-readable string (KB/s, MB/s, etc.)
    pub fn format_bytes_rate(&self, prev: &CounterSnapshot, elapsed_secs: f64) -> String {
        let rate = if elapsed_secs > 0.0 {
            self.bytes.saturating_sub(prev.bytes) as f64 / elapsed_secs
        } else {
            0.0
        };
        if rate >= 1_000_000_000.0 {
            format!("{:.2} GB/s", rate / 1_000_000_000.0)
        } else if rate >= 1_000_000.0 {
            format!("{:.2} MB/s", rate / 1_000_000.0)
        } else if rate >= 1_000.0 {
            format!("{:.2} KB/s", rate / 1_000.0)
        } else {
            format!("{:.0} B/s", rate)
        }
    }
}
