//! Cyclic exchange statistics.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Counters maintained by the cyclic loop. All fields are atomics so caller
/// threads can snapshot them without touching the image lock.
#[derive(Debug)]
pub struct CycleStats {
    cycles: AtomicU64,
    wkc_errors: AtomicU64,
    deadline_misses: AtomicU64,
    receive_errors: AtomicU64,
    last_rtt_us: AtomicU32,
    min_rtt_us: AtomicU32,
    max_rtt_us: AtomicU32,
}

impl Default for CycleStats {
    fn default() -> Self {
        Self {
            cycles: AtomicU64::new(0),
            wkc_errors: AtomicU64::new(0),
            deadline_misses: AtomicU64::new(0),
            receive_errors: AtomicU64::new(0),
            last_rtt_us: AtomicU32::new(0),
            min_rtt_us: AtomicU32::new(u32::MAX),
            max_rtt_us: AtomicU32::new(0),
        }
    }
}

impl CycleStats {
    /// Record one completed exchange.
    pub fn record_cycle(&self, rtt_us: u32, wkc_ok: bool) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        if !wkc_ok {
            self.wkc_errors.fetch_add(1, Ordering::Relaxed);
        }
        self.last_rtt_us.store(rtt_us, Ordering::Relaxed);
        self.min_rtt_us.fetch_min(rtt_us, Ordering::Relaxed);
        self.max_rtt_us.fetch_max(rtt_us, Ordering::Relaxed);
    }

    /// Record a cycle that overran its deadline.
    pub fn record_deadline_miss(&self) {
        self.deadline_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed receive.
    pub fn record_receive_error(&self) {
        self.receive_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Coherent-enough copy of the counters.
    pub fn snapshot(&self) -> CycleStatsSnapshot {
        let min = self.min_rtt_us.load(Ordering::Relaxed);
        CycleStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            wkc_errors: self.wkc_errors.load(Ordering::Relaxed),
            deadline_misses: self.deadline_misses.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            last_rtt_us: self.last_rtt_us.load(Ordering::Relaxed),
            min_rtt_us: if min == u32::MAX { 0 } else { min },
            max_rtt_us: self.max_rtt_us.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`CycleStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStatsSnapshot {
    /// Total exchange cycles completed.
    pub cycles: u64,
    /// Cycles whose working counter fell short of the expected value.
    pub wkc_errors: u64,
    /// Cycles that exceeded the configured cycle time.
    pub deadline_misses: u64,
    /// Failed receives.
    pub receive_errors: u64,
    /// Round-trip time of the most recent exchange.
    pub last_rtt_us: u32,
    /// Fastest observed round-trip.
    pub min_rtt_us: u32,
    /// Slowest observed round-trip.
    pub max_rtt_us: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtt_extremes() {
        let stats = CycleStats::default();
        stats.record_cycle(100, true);
        stats.record_cycle(150, true);
        stats.record_cycle(80, false);

        let snap = stats.snapshot();
        assert_eq!(snap.cycles, 3);
        assert_eq!(snap.wkc_errors, 1);
        assert_eq!(snap.last_rtt_us, 80);
        assert_eq!(snap.min_rtt_us, 80);
        assert_eq!(snap.max_rtt_us, 150);
    }

    #[test]
    fn test_empty_snapshot() {
        let stats = CycleStats::default();
        let snap = stats.snapshot();
        assert_eq!(snap.cycles, 0);
        assert_eq!(snap.min_rtt_us, 0);
    }
}
