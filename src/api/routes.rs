use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::api::fanout::FanoutStats;
use crate::api::health::HealthState;
use crate::config::RECENT_DEFAULT_LIMIT;
use crate::error::AppError;
use crate::hub::StatsHub;
use crate::types::{Stats, ViewerState};
use crate::ws::session::serve_viewer;

#[derive(Clone)]
pub struct ApiState {
    pub hub: Arc<StatsHub>,
    pub health: Arc<HealthState>,
    pub fanout: Arc<FanoutStats>,
    pub window: Duration,
    pub shutdown: watch::Receiver<bool>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/ws", get(viewer_socket))
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .route("/stats/recent", get(get_recent_stats))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub viewers: usize,
    /// Records queued across all viewers, not yet written to their sockets.
    pub viewer_backlog: usize,
    pub samples_ingested: u64,
    pub samples_dropped: u64,
    pub records_written: u64,
    pub last_window_at: Option<i64>,
    pub window_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LatencyResponse {
    pub p50_us: Option<u64>,
    pub p95_us: Option<u64>,
    pub p99_us: Option<u64>,
    /// Publishes measured, one per committed window.
    pub sample_count: u64,
    pub deliveries: u64,
    pub evictions: u64,
    pub widest_fanout: u64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn viewer_socket(ws: WebSocketUpgrade, State(state): State<ApiState>) -> impl IntoResponse {
    debug!(state = %ViewerState::Connecting, "Viewer upgrading");
    ws.on_upgrade(move |socket| serve_viewer(socket, state.hub, state.shutdown))
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let registry = state.hub.registry();
    let mut viewers = 0;
    let mut viewer_backlog = 0;
    registry.for_each(|_, viewer| {
        viewers += 1;
        viewer_backlog += viewer.backlog();
    });

    let last = state.health.last_window_at();
    Json(HealthResponse {
        viewers,
        viewer_backlog,
        samples_ingested: state.health.samples_ingested(),
        samples_dropped: state.health.samples_dropped(),
        records_written: state.health.records_written(),
        last_window_at: (last > 0).then_some(last),
        window_ms: state.window.as_millis() as u64,
    })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let snap = state.fanout.snapshot();
    Json(LatencyResponse {
        p50_us: snap.p50_us,
        p95_us: snap.p95_us,
        p99_us: snap.p99_us,
        sample_count: snap.publishes,
        deliveries: snap.deliveries,
        evictions: snap.evictions,
        widest_fanout: snap.widest,
    })
}

async fn get_recent_stats(
    State(state): State<ApiState>,
    Query(params): Query<RecentQuery>,
) -> Result<Json<Vec<Stats>>, AppError> {
    let limit = params.limit.unwrap_or(RECENT_DEFAULT_LIMIT);
    let mut reader = state.hub.read_all().await?;

    let mut recent = VecDeque::with_capacity(limit.min(1024));
    while let Some(stats) = reader.next_record().await? {
        if recent.len() == limit {
            recent.pop_front();
        }
        if limit > 0 {
            recent.push_back(stats);
        }
    }

    Ok(Json(recent.into_iter().collect()))
}
