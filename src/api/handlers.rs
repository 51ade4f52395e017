//! HTTP API handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::sync::RwLock;

/// Open position as shown on the status endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PositionView {
    /// Window the position belongs to.
    pub window_id: String,
    /// Outcome held.
    pub side: String,
    /// Shares held.
    pub shares: String,
    /// Price paid per share.
    pub cost_basis: String,
}

/// Point-in-time view of the bot, refreshed by the driver every tick.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// `paper` or `live`.
    pub mode: String,
    /// Engine phase.
    pub phase: String,
    /// Focused window.
    pub window: Option<String>,
    /// Seconds until the focused window closes.
    pub seconds_remaining: Option<i64>,
    /// Free cash.
    pub cash: String,
    /// Cash plus open positions at cost.
    pub equity: String,
    /// Open position, if any.
    pub position: Option<PositionView>,
    /// Realized P&L since start.
    pub realized_pnl: String,
    /// Completed trades.
    pub trades: usize,
    /// Winning trades.
    pub wins: usize,
    /// Losing trades.
    pub losses: usize,
    /// Windows waiting on resolution.
    pub pending_settlements: usize,
    /// Ticks processed.
    pub ticks: u64,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            mode: "paper".to_string(),
            phase: "idle".to_string(),
            window: None,
            seconds_remaining: None,
            cash: "0".to_string(),
            equity: "0".to_string(),
            position: None,
            realized_pnl: "0".to_string(),
            trades: 0,
            wins: 0,
            losses: 0,
            pending_settlements: 0,
            ticks: 0,
        }
    }
}

/// Application state shared with handlers.
#[derive(Clone)]
pub struct AppState {
    /// Whether a window is being tracked.
    pub ready: Arc<AtomicBool>,
    /// Whether the kill switch took effect.
    pub halted: Arc<AtomicBool>,
    /// Latest status.
    pub snapshot: Arc<RwLock<StatusSnapshot>>,
    /// Prometheus renderer, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Create new app state.
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            halted: Arc::new(AtomicBool::new(false)),
            snapshot: Arc::new(RwLock::new(StatusSnapshot::default())),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Set ready state.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Check if ready.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Record that trading halted.
    pub fn set_halted(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    /// Check if halted.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Replace the status snapshot.
    pub async fn publish(&self, snapshot: StatusSnapshot) {
        *self.snapshot.write().await = snapshot;
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Status: "ok".
    pub status: &'static str,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether service is ready.
    pub ready: bool,
    /// Current window if available.
    pub window: Option<String>,
}

/// Status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// `starting`, `running` or `halted`.
    pub status: &'static str,
    /// Bot state.
    #[serde(flatten)]
    pub snapshot: StatusSnapshot,
}

/// Health check handler - always returns 200.
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Readiness check handler - returns 200 once a window is tracked, 503 otherwise.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let is_ready = state.is_ready();
    let window = state.snapshot.read().await.window.clone();

    let response = ReadyResponse {
        ready: is_ready,
        window,
    };

    if is_ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// Status handler - returns engine phase, ledger balances and trade counts.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.snapshot.read().await.clone();

    let status = if state.is_halted() {
        "halted"
    } else if state.is_ready() {
        "running"
    } else {
        "starting"
    };

    Json(StatusResponse { status, snapshot })
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}
