use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::health::HealthState;
use crate::error::Result;
use crate::hub::StatsHub;
use crate::types::Window;

/// Sole owner of the open window. Samples and ticks are multiplexed through
/// one select loop, so ingestion and window closing never overlap.
pub struct Aggregator {
    hub: Arc<StatsHub>,
    sample_rx: mpsc::Receiver<f64>,
    shutdown: watch::Receiver<bool>,
    health: Arc<HealthState>,
    period: Duration,
    threshold: f64,
    window: Window,
    windows_closed: u64,
}

impl Aggregator {
    pub fn new(
        hub: Arc<StatsHub>,
        sample_rx: mpsc::Receiver<f64>,
        shutdown: watch::Receiver<bool>,
        health: Arc<HealthState>,
        period: Duration,
        threshold: f64,
    ) -> Self {
        Self {
            hub,
            sample_rx,
            shutdown,
            health,
            period,
            threshold,
            window: Window::new(),
            windows_closed: 0,
        }
    }

    /// Runs until shutdown. Only a failed persistence append ends it early,
    /// and that error is fatal for the process.
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = interval(self.period);
        ticker.tick().await; // consume immediate first tick

        let mut source_open = true;
        loop {
            tokio::select! {
                sample = self.sample_rx.recv(), if source_open => {
                    match sample {
                        Some(ms) => self.ingest(ms),
                        None => {
                            // Keep closing (empty) windows so viewers' timelines stay contiguous.
                            info!("Sample source ended, continuing with empty windows");
                            source_open = false;
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.close_window(unix_now_secs()).await?;
                }

                _ = self.shutdown.changed() => {
                    info!(windows = self.windows_closed, "Aggregator stopping");
                    return Ok(());
                }
            }
        }
    }

    /// Adds one sample to the open window. Never fails; bad values are logged
    /// and dropped.
    pub fn ingest(&mut self, ms: f64) {
        if !ms.is_finite() || ms < 0.0 {
            warn!(sample = ms, "Dropping invalid latency sample");
            self.health.inc_samples_dropped();
            return;
        }
        self.window.push(ms);
        self.health.inc_samples_ingested();
    }

    /// Reduces the open window, persists it, then publishes it.
    async fn close_window(&mut self, now_secs: i64) -> Result<()> {
        let samples = self.window.len();
        let stats = self.window.close(now_secs, self.threshold);
        let delivered = self.hub.commit(&stats).await?;
        self.windows_closed += 1;

        info!(
            timestamp = stats.timestamp,
            samples,
            min = stats.min,
            max = stats.max,
            above_pct = stats.above_threshold_pct,
            "Window closed | avg {:.3}ms | sent to {delivered} viewer(s)",
            stats.average,
        );
        debug!(windows = self.windows_closed, "Window committed");
        Ok(())
    }
}

fn unix_now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fanout::FanoutStats;
    use crate::db::{LogReader, LogWriter};
    use crate::state::ClientRegistry;
    use crate::ws::broadcast::Broadcaster;
    use std::path::Path;

    fn hub(path: &Path, health: &Arc<HealthState>) -> Arc<StatsHub> {
        let writer = LogWriter::open(path).unwrap();
        let broadcaster = Broadcaster::new(ClientRegistry::new(), Arc::new(FanoutStats::new()));
        StatsHub::new(writer, broadcaster, Arc::clone(health))
    }

    #[tokio::test(start_paused = true)]
    async fn one_record_per_elapsed_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pings.jsonl");
        let health = Arc::new(HealthState::new());
        let hub = hub(&path, &health);

        let (sample_tx, sample_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let aggregator = Aggregator::new(
            Arc::clone(&hub),
            sample_rx,
            shutdown_rx,
            Arc::clone(&health),
            Duration::from_secs(1),
            10.0,
        );

        for s in [10.0, 20.0, 30.0] {
            sample_tx.send(s).await.unwrap();
        }
        let task = tokio::spawn(aggregator.run());

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        let records = LogReader::open(&path).await.unwrap().read_to_end().await.unwrap();
        assert_eq!(records.len(), 3);

        let first = records[0];
        assert_eq!(first.average, 20.0);
        assert_eq!(first.min, 10.0);
        assert_eq!(first.max, 30.0);
        assert_eq!(first.above_threshold_pct, 100.0);

        // Later windows were empty but still recorded.
        for empty in &records[1..] {
            assert_eq!(empty.average, 0.0);
            assert_eq!(empty.above_threshold_pct, 0.0);
        }
        assert_eq!(health.samples_ingested(), 3);
        assert_eq!(health.records_written(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_ticking_after_source_ends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pings.jsonl");
        let health = Arc::new(HealthState::new());
        let hub = hub(&path, &health);

        let (sample_tx, sample_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let aggregator = Aggregator::new(
            hub,
            sample_rx,
            shutdown_rx,
            Arc::clone(&health),
            Duration::from_millis(500),
            10.0,
        );
        sample_tx.send(5.0).await.unwrap();
        drop(sample_tx);

        let task = tokio::spawn(aggregator.run());
        tokio::time::sleep(Duration::from_millis(2_250)).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();

        let records = LogReader::open(&path).await.unwrap().read_to_end().await.unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].average, 5.0);
        assert_eq!(records[0].above_threshold_pct, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_append_stops_the_aggregator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pings.jsonl");
        LogWriter::open(&path).unwrap();
        let health = Arc::new(HealthState::new());
        let broadcaster = Broadcaster::new(ClientRegistry::new(), Arc::new(FanoutStats::new()));
        let hub = StatsHub::new(LogWriter::read_only(&path).unwrap(), broadcaster, Arc::clone(&health));
        let (live_tx, mut live) = mpsc::channel(4);
        hub.registry().register(live_tx);

        let (sample_tx, sample_rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let aggregator = Aggregator::new(hub, sample_rx, shutdown_rx, Arc::clone(&health), Duration::from_secs(1), 10.0);
        sample_tx.send(12.0).await.unwrap();

        let result = tokio::spawn(aggregator.run()).await.unwrap();
        assert!(result.is_err());
        assert!(live.try_recv().is_err());
        assert_eq!(health.records_written(), 0);
    }

    #[test]
    fn invalid_samples_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let health = Arc::new(HealthState::new());
        let hub = hub(&dir.path().join("pings.jsonl"), &health);
        let (_tx, rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut aggregator = Aggregator::new(hub, rx, shutdown_rx, Arc::clone(&health), Duration::from_secs(1), 10.0);

        aggregator.ingest(f64::NAN);
        aggregator.ingest(f64::INFINITY);
        aggregator.ingest(-1.0);
        aggregator.ingest(12.0);

        assert_eq!(aggregator.window.len(), 1);
        assert_eq!(health.samples_dropped(), 3);
        assert_eq!(health.samples_ingested(), 1);
    }
}
