use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::source::SampleSource;

/// Samples at or above this latency (ms) count towards `above_threshold_pct`.
pub const ABOVE_THRESHOLD_MS: f64 = 100.0;

/// Channel capacity between the sample source and the aggregator.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Live records queued per viewer before it is treated as stalled and dropped.
pub const VIEWER_QUEUE_CAPACITY: usize = 256;

/// Upper bound on a single write+flush to a viewer socket.
pub const VIEWER_WRITE_TIMEOUT_MS: u64 = 5_000;

/// Restart backoff for a sample source whose child process exited.
pub const SOURCE_RESTART_BACKOFF_MS: &[u64] = &[500, 1_000, 2_000, 5_000];

/// How long the HTTP server gets to drain after viewers are closed.
pub const SHUTDOWN_GRACE_SECS: u64 = 5;

/// Default row count for `/stats/recent`.
pub const RECENT_DEFAULT_LIMIT: usize = 100;

/// Allowed aggregation window range in milliseconds.
pub const MIN_WINDOW_MS: u64 = 100;
pub const MAX_WINDOW_MS: u64 = 3_600_000;

pub const DEFAULT_WINDOW_MS: u64 = 60_000;
pub const DEFAULT_PORT: u16 = 9998;
pub const DEFAULT_LOG_PATH: &str = "./.pings";

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    /// HTTP/WebSocket listen port (PORT)
    pub listen_port: u16,
    /// Aggregation window length (WINDOW_MS)
    pub window: Duration,
    /// Append-only persistence file (PINGS_PATH)
    pub log_path: PathBuf,
    /// Where latency samples come from (SAMPLE_SOURCE, TARGET_HOST)
    pub sample_source: SampleSource,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let window_ms = std::env::var("WINDOW_MS")
            .unwrap_or_else(|_| DEFAULT_WINDOW_MS.to_string())
            .parse::<u64>()
            .map_err(|_| AppError::Config("WINDOW_MS must be an integer".to_string()))?;

        let log_path = std::env::var("PINGS_PATH").unwrap_or_else(|_| DEFAULT_LOG_PATH.to_string());
        if log_path.trim().is_empty() {
            return Err(AppError::Config("PINGS_PATH must not be empty".to_string()));
        }

        let source = std::env::var("SAMPLE_SOURCE").unwrap_or_else(|_| "stdin".to_string());
        let target_host = std::env::var("TARGET_HOST").ok();

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            listen_port: std::env::var("PORT")
                .unwrap_or_else(|_| DEFAULT_PORT.to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("PORT must be a valid port number".to_string()))?,
            window: window_from_ms(window_ms)?,
            log_path: PathBuf::from(log_path),
            sample_source: SampleSource::from_config(&source, target_host.as_deref())?,
        })
    }
}

/// Validates a window length against [`MIN_WINDOW_MS`, `MAX_WINDOW_MS`].
pub fn window_from_ms(ms: u64) -> Result<Duration> {
    if !(MIN_WINDOW_MS..=MAX_WINDOW_MS).contains(&ms) {
        return Err(AppError::Config(format!(
            "WINDOW_MS must be between {MIN_WINDOW_MS} and {MAX_WINDOW_MS}, got {ms}"
        )));
    }
    Ok(Duration::from_millis(ms))
}
