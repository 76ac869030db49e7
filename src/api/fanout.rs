//! Publish fan-out accounting behind `/stats/latency`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;

/// What the broadcaster did per publish: how long the pass over the registry
/// took, how many viewer queues it reached and how many it evicted.
pub struct FanoutStats {
    /// Pass duration in microseconds, 1us to 100s at 3 significant figures.
    pass_us: Mutex<Histogram<u64>>,
    deliveries: AtomicU64,
    evictions: AtomicU64,
    widest: AtomicU64,
}

/// Point-in-time copy of [`FanoutStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutSnapshot {
    pub p50_us: Option<u64>,
    pub p95_us: Option<u64>,
    pub p99_us: Option<u64>,
    pub publishes: u64,
    pub deliveries: u64,
    pub evictions: u64,
    /// Most viewers reached by a single publish.
    pub widest: u64,
}

impl FanoutStats {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(1, 100_000_000, 3).expect("valid histogram bounds");
        Self {
            pass_us: Mutex::new(histogram),
            deliveries: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            widest: AtomicU64::new(0),
        }
    }

    pub fn record_publish(&self, elapsed: Duration, delivered: usize, evicted: usize) {
        let us = elapsed.as_micros().min(u128::from(u64::MAX)) as u64;
        if let Ok(mut h) = self.pass_us.lock() {
            // A pass over an empty registry rounds down to 0us.
            let _ = h.record(us.max(1));
        }
        self.deliveries.fetch_add(delivered as u64, Ordering::Relaxed);
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        self.widest.fetch_max(delivered as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FanoutSnapshot {
        let (p50_us, p95_us, p99_us, publishes) = match self.pass_us.lock() {
            Ok(h) if h.len() > 0 => (
                Some(h.value_at_quantile(0.5)),
                Some(h.value_at_quantile(0.95)),
                Some(h.value_at_quantile(0.99)),
                h.len(),
            ),
            _ => (None, None, None, 0),
        };
        FanoutSnapshot {
            p50_us,
            p95_us,
            p99_us,
            publishes,
            deliveries: self.deliveries.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            widest: self.widest.load(Ordering::Relaxed),
        }
    }
}

impl Default for FanoutStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_published_yet() {
        let snap = FanoutStats::new().snapshot();
        assert_eq!((snap.p50_us, snap.p95_us, snap.p99_us), (None, None, None));
        assert_eq!(snap.publishes, 0);
        assert_eq!(snap.widest, 0);
    }

    #[test]
    fn percentiles_follow_pass_durations() {
        let fanout = FanoutStats::new();
        for us in 1..=100 {
            fanout.record_publish(Duration::from_micros(us), 0, 0);
        }
        let snap = fanout.snapshot();
        assert_eq!(snap.publishes, 100);
        assert!((49..=51).contains(&snap.p50_us.unwrap()));
        assert!(snap.p95_us.unwrap() <= snap.p99_us.unwrap());
    }

    #[test]
    fn counts_deliveries_evictions_and_widest_pass() {
        let fanout = FanoutStats::new();
        fanout.record_publish(Duration::ZERO, 3, 0);
        fanout.record_publish(Duration::ZERO, 5, 1);
        fanout.record_publish(Duration::ZERO, 2, 3);

        let snap = fanout.snapshot();
        assert_eq!(snap.publishes, 3);
        assert_eq!(snap.deliveries, 10);
        assert_eq!(snap.evictions, 4);
        assert_eq!(snap.widest, 5);
        // Sub-microsecond passes land in the lowest bucket.
        assert_eq!(snap.p99_us, Some(1));
    }
}
