use std::collections::VecDeque;

use serde::Deserialize;

/// Rows kept for the window table. The server replays the whole log on
/// connect, so older records are dropped from the front.
pub const MAX_RECORDS: usize = 500;

// ---------------------------------------------------------------------------
// Wire and API response types (mirror the server's shapes)
// ---------------------------------------------------------------------------

/// One closed window as it arrives on the WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct StatsFrame {
    pub timestamp: i64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    #[serde(rename = "above")]
    pub above_pct: f64,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HealthResponse {
    pub viewers: usize,
    pub viewer_backlog: usize,
    pub samples_ingested: u64,
    pub samples_dropped: u64,
    pub records_written: u64,
    pub last_window_at: Option<i64>,
    pub window_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LatencyResponse {
    pub p50_us: Option<u64>,
    pub p95_us: Option<u64>,
    pub p99_us: Option<u64>,
    pub sample_count: u64,
    pub deliveries: u64,
    pub evictions: u64,
    pub widest_fanout: u64,
}

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Error(String),
    Connecting,
}

/// What the feed task reports to the UI loop.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Connected,
    Record(StatsFrame),
    Disconnected(String),
}

/// Aggregate over the records currently buffered. Latency figures only cover
/// windows that saw at least one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub windows: usize,
    /// Windows that closed with no samples.
    pub idle: usize,
    pub mean_average: Option<f64>,
    pub lowest: Option<f64>,
    pub highest: Option<f64>,
    pub mean_above_pct: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub status: ConnectionStatus,
    pub records: VecDeque<StatsFrame>,
    pub health: HealthResponse,
    pub latency: LatencyResponse,
    /// Last failure talking to the HTTP endpoints, cleared on success.
    pub api_error: Option<String>,
    pub reconnects: u64,
    pub base_url: String,
}

impl AppState {
    pub fn new(base_url: String) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            records: VecDeque::with_capacity(MAX_RECORDS),
            health: HealthResponse::default(),
            latency: LatencyResponse::default(),
            api_error: None,
            reconnects: 0,
            base_url,
        }
    }

    pub fn apply(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Connected => {
                // Every connection starts with a full replay.
                if !self.records.is_empty() {
                    self.reconnects += 1;
                }
                self.records.clear();
                self.status = ConnectionStatus::Connected;
            }
            FeedEvent::Record(frame) => {
                if self.records.len() == MAX_RECORDS {
                    self.records.pop_front();
                }
                self.records.push_back(frame);
            }
            FeedEvent::Disconnected(reason) => {
                self.status = ConnectionStatus::Error(reason);
            }
        }
    }

    pub fn latest(&self) -> Option<&StatsFrame> {
        self.records.back()
    }

    pub fn summary(&self) -> Option<Summary> {
        if self.records.is_empty() {
            return None;
        }
        let mut active = 0usize;
        let mut lowest = f64::INFINITY;
        let mut highest = f64::NEG_INFINITY;
        let mut avg_sum = 0.0;
        let mut above_sum = 0.0;
        for r in self.records.iter().filter(|r| !is_idle(r)) {
            active += 1;
            lowest = lowest.min(r.min);
            highest = highest.max(r.max);
            avg_sum += r.average;
            above_sum += r.above_pct;
        }
        let n = active as f64;
        let over_active = |v: f64| (active > 0).then_some(v);
        Some(Summary {
            windows: self.records.len(),
            idle: self.records.len() - active,
            mean_average: over_active(avg_sum / n),
            lowest: over_active(lowest),
            highest: over_active(highest),
            mean_above_pct: over_active(above_sum / n),
        })
    }

    pub async fn refresh(&mut self, client: &reqwest::Client) {
        let health_url = format!("{}/health", self.base_url);
        let latency_url = format!("{}/stats/latency", self.base_url);

        let (health_res, latency_res) = tokio::join!(
            fetch::<HealthResponse>(client, &health_url),
            fetch::<LatencyResponse>(client, &latency_url),
        );

        match (health_res, latency_res) {
            (Ok(health), Ok(latency)) => {
                self.health = health;
                self.latency = latency;
                self.api_error = None;
            }
            (Err(e), _) | (_, Err(e)) => {
                self.api_error = Some(e);
            }
        }
    }
}

/// The server closes a window with no samples as all zeros.
pub fn is_idle(r: &StatsFrame) -> bool {
    r.min == 0.0 && r.max == 0.0 && r.average == 0.0
}

async fn fetch<T: serde::de::DeserializeOwned>(client: &reqwest::Client, url: &str) -> Result<T, String> {
    let resp = client.get(url).send().await.map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("{url}: HTTP {}", resp.status()));
    }
    resp.json::<T>().await.map_err(|e| format!("parse error: {e}"))
}

/// Maps the HTTP base URL onto the viewer WebSocket endpoint.
pub fn ws_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}/ws")
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

pub fn format_ms(ms: f64) -> String {
    if ms >= 1000.0 {
        format!("{:.2}s", ms / 1000.0)
    } else {
        format!("{ms:.2}ms")
    }
}

pub fn format_pct(pct: f64) -> String {
    format!("{pct:.1}%")
}

pub fn format_us(us: Option<u64>) -> String {
    us.map_or("—".to_string(), |v| format!("{v}µs"))
}

/// Convert a unix timestamp in seconds to an HH:MM:SS string (UTC).
pub fn format_time_secs(secs: i64) -> String {
    let secs = secs.rem_euclid(86_400);
    let h = secs / 3600;
    let m = (secs / 60) % 60;
    let s = secs % 60;
    format!("{h:02}:{m:02}:{s:02}")
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}
