//! HTTP API handlers: exposes collector state as JSON.

use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use witness_core::LearnSessionId;
use witness_services::{CollectorStats, StatsSnapshot};

#[derive(Clone)]
pub struct ApiState {
    pub session_id: LearnSessionId,
    pub started_at: DateTime<Utc>,
    pub inbound: Arc<CollectorStats>,
    pub outbound: Arc<CollectorStats>,
}

impl ApiState {
    pub fn new(
        session_id: LearnSessionId,
        inbound: Arc<CollectorStats>,
        outbound: Arc<CollectorStats>,
    ) -> Self {
        Self {
            session_id,
            started_at: Utc::now(),
            inbound,
            outbound,
        }
    }
}

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub session_id: String,
    pub uptime_secs: i64,
    pub inbound: StatsSnapshot,
    pub outbound: StatsSnapshot,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0);
    Json(StatusResponse {
        session_id: state.session_id.to_string(),
        uptime_secs,
        inbound: state.inbound.snapshot(),
        outbound: state.outbound.snapshot(),
    })
}

// ── /health ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
}

pub async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}
