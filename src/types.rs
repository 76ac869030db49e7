use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Summary of one closed aggregation window. This is both the persisted
/// record and the wire record sent to viewers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    /// Epoch seconds at which the window closed.
    pub timestamp: i64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    /// Percentage (0-100) of samples at or above the threshold.
    #[serde(rename = "above")]
    pub above_threshold_pct: f64,
}

impl Stats {
    /// Reduces a window's samples. An empty slice yields all-zero values.
    pub fn from_samples(timestamp: i64, samples: &[f64], threshold: f64) -> Self {
        if samples.is_empty() {
            return Self {
                timestamp,
                average: 0.0,
                min: 0.0,
                max: 0.0,
                above_threshold_pct: 0.0,
            };
        }

        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut above = 0usize;
        for &s in samples {
            sum += s;
            min = min.min(s);
            max = max.max(s);
            if s >= threshold {
                above += 1;
            }
        }
        let n = samples.len() as f64;

        Self {
            timestamp,
            // Clamp so float rounding in the mean can never escape [min, max].
            average: (sum / n).clamp(min, max),
            min,
            max,
            above_threshold_pct: above as f64 * 100.0 / n,
        }
    }
}

// ---------------------------------------------------------------------------
// Window
// ---------------------------------------------------------------------------

/// Samples collected between two aggregation ticks. Owned by the aggregator.
#[derive(Debug, Default)]
pub struct Window {
    samples: Vec<f64>,
}

impl Window {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: f64) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Reduces the window to a `Stats` record and leaves it empty.
    pub fn close(&mut self, timestamp: i64, threshold: f64) -> Stats {
        let samples = std::mem::take(&mut self.samples);
        Stats::from_samples(timestamp, &samples, threshold)
    }
}

// ---------------------------------------------------------------------------
// Viewer lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerState {
    /// Transport handshake in progress.
    Connecting,
    /// Streaming persisted history; not yet registered.
    Replaying,
    /// Registered and receiving every publish.
    Live,
    Closed,
}

impl std::fmt::Display for ViewerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ViewerState::Connecting => "connecting",
            ViewerState::Replaying => "replaying",
            ViewerState::Live => "live",
            ViewerState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Why a live viewer session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Close frame or EOF from the viewer.
    ClientClosed,
    /// The broadcaster dropped the viewer's queue (stalled or pruned).
    Evicted,
    WriteFailed,
    WriteTimeout,
    /// Transport-level read error.
    ProtocolError,
    ShuttingDown,
}

impl std::fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionEnd::ClientClosed => "client_closed",
            SessionEnd::Evicted => "evicted",
            SessionEnd::WriteFailed => "write_failed",
            SessionEnd::WriteTimeout => "write_timeout",
            SessionEnd::ProtocolError => "protocol_error",
            SessionEnd::ShuttingDown => "shutting_down",
        };
        write!(f, "{s}")
    }
}
