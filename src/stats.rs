//! Ambient error counters (A3 supplement).
//!
//! Neither process exposes these over a network interface (admin/HTTP
//! surfaces are a non-goal); they exist so a process can log its own health
//! on each tick and so tests can assert on recovery behaviour without
//! scraping log output. Each counter is an [`AtomicU64`] rather than a plain
//! field so a snapshot can be taken through a shared reference while the
//! owning event loop keeps mutating it on every tick.

use std::sync::atomic::{AtomicU64, Ordering};

/// A point-in-time copy of a [`Counters`] set, safe to pass across threads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Frames or records that failed to decode.
    pub framing_errors: u64,
    /// Transport-level failures (read/write errors, timeouts, overflow).
    pub transport_errors: u64,
    /// Broker produce/consume failures.
    pub broker_errors: u64,
    /// Responses dropped because their target slot was missing or closed.
    pub dropped_responses: u64,
}

/// Error counters shared by the gateway and order service event loops.
#[derive(Debug, Default)]
pub struct Counters {
    framing_errors: AtomicU64,
    transport_errors: AtomicU64,
    broker_errors: AtomicU64,
    dropped_responses: AtomicU64,
}

impl Counters {
    /// Create a zeroed counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a framing error (malformed frame, unknown type, bad payload).
    pub fn record_framing_error(&self) {
        self.framing_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transport error (read/write failure, timeout, overflow).
    pub fn record_transport_error(&self) {
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a broker produce or consume error.
    pub fn record_broker_error(&self) {
        self.broker_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a response dropped for want of a live target slot.
    pub fn record_dropped_response(&self) {
        self.dropped_responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of every counter.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            broker_errors: self.broker_errors.load(Ordering::Relaxed),
            dropped_responses: self.dropped_responses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_accumulate() {
        let counters = Counters::new();
        assert_eq!(counters.snapshot(), Snapshot::default());
        counters.record_framing_error();
        counters.record_broker_error();
        counters.record_broker_error();
        let snap = counters.snapshot();
        assert_eq!(snap.framing_errors, 1);
        assert_eq!(snap.broker_errors, 2);
        assert_eq!(snap.transport_errors, 0);
    }
}
