//! Per-session statistics counters, read with relaxed ordering: no cross-field atomicity is
//! promised or required, only that each counter individually only ever increases.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Stats {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    payloads_dropped: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bytes_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_bytes_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_payloads_dropped(&self, n: u64) {
        self.payloads_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn payloads_dropped(&self) -> u64 {
        self.payloads_dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = Stats::new();
        stats.add_bytes_sent(3);
        stats.add_bytes_sent(5);
        assert_eq!(stats.bytes_sent(), 8);
        assert_eq!(stats.bytes_received(), 0);
        stats.add_payloads_dropped(2);
        assert_eq!(stats.payloads_dropped(), 2);
    }
}
