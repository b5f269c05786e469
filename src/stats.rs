use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingSummary {
    pub elapsed_seconds: f64,
    pub messages_received: u64,
    pub messages_skipped: u64,
    pub pings_sent: u64,
}

/// Counters for one queue-draining run.
pub struct ProcessingStats {
    start_time: Instant,
    received: AtomicU64,
    skipped: AtomicU64,
    sent: AtomicU64,
}

impl ProcessingStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            received: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            sent: AtomicU64::new(0),
        }
    }

    pub fn message_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ping_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> ProcessingSummary {
        ProcessingSummary {
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
            messages_received: self.received.load(Ordering::Relaxed),
            messages_skipped: self.skipped.load(Ordering::Relaxed),
            pings_sent: self.sent.load(Ordering::Relaxed),
        }
    }
}

impl Default for ProcessingStats {
    fn default() -> Self {
        Self::new()
    }
}
