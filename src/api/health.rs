//! Shared health counters for the /health endpoint.
//! Updated by the aggregator and the hub.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Default)]
pub struct HealthState {
    pub samples_ingested: AtomicU64,
    /// Samples rejected as malformed at ingestion.
    pub samples_dropped: AtomicU64,
    /// Records in the persistence log, including those from earlier runs.
    pub records_written: AtomicU64,
    /// Epoch seconds of the last committed window (0 = none this run).
    pub last_window_at: AtomicI64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_samples_ingested(&self) {
        self.samples_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_samples_dropped(&self) {
        self.samples_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_records_written(&self, n: u64) {
        self.records_written.store(n, Ordering::Relaxed);
    }

    pub fn set_last_window_at(&self, secs: i64) {
        self.last_window_at.store(secs, Ordering::Relaxed);
    }

    pub fn samples_ingested(&self) -> u64 {
        self.samples_ingested.load(Ordering::Relaxed)
    }

    pub fn samples_dropped(&self) -> u64 {
        self.samples_dropped.load(Ordering::Relaxed)
    }

    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    pub fn last_window_at(&self) -> i64 {
        self.last_window_at.load(Ordering::Relaxed)
    }
}
