//! Witness integration test harness.
//!
//! Tests run the real collector, uploader and REST client against an
//! in-process mock of the learn service bound to an ephemeral localhost
//! port. No external services are needed:
//!
//!   cargo test --test integration

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};

use witness_core::config::{Credentials, TransportConfig, WitnessConfig};
use witness_core::wire::ReportBatch;
use witness_core::{LearnSessionId, NetworkDirection, WitnessReport};
use witness_services::{
    CollectorSettings, CollectorStats, LearnClient, NoRedaction, PluginChain, RestLearnClient,
    WitnessCollector, WitnessUploader,
};

mod pipeline;
mod replay;
mod transport;

pub const API_KEY_ID: &str = "key-id";
pub const API_KEY_SECRET: &str = "key-secret";

// ── Mock learn service ────────────────────────────────────────────────────────

/// One request as the mock saw it.
#[derive(Debug, Clone)]
pub struct Received {
    pub session: String,
    pub authorization: Option<String>,
    pub build: Option<String>,
    pub reports: Vec<WitnessReport>,
}

#[derive(Default)]
struct MockState {
    received: Vec<Received>,
    /// Statuses to answer with, in order. 200 once exhausted.
    script: VecDeque<u16>,
    delay: Option<Duration>,
}

#[derive(Clone)]
pub struct MockLearnService {
    pub addr: SocketAddr,
    state: Arc<Mutex<MockState>>,
}

impl MockLearnService {
    pub async fn start() -> Result<Self> {
        let state = Arc::new(Mutex::new(MockState::default()));

        let app = Router::new()
            .route(
                "/v1/learn_sessions/{session}/witness_reports",
                post(handle_reports),
            )
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock learn service")?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self { addr, state })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Answer the next requests with these statuses.
    pub fn script(&self, statuses: &[u16]) {
        self.state.lock().unwrap().script.extend(statuses);
    }

    pub fn delay_responses(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    pub fn received(&self) -> Vec<Received> {
        self.state.lock().unwrap().received.clone()
    }

    /// Every report the mock accepted or rejected, in arrival order.
    pub fn reports(&self) -> Vec<WitnessReport> {
        self.received()
            .into_iter()
            .flat_map(|r| r.reports)
            .collect()
    }
}

async fn handle_reports(
    State(state): State<Arc<Mutex<MockState>>>,
    Path(session): Path<String>,
    headers: HeaderMap,
    Json(batch): Json<ReportBatch>,
) -> (StatusCode, String) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let (status, delay) = {
        let mut state = state.lock().unwrap();
        state.received.push(Received {
            session,
            authorization: header("authorization"),
            build: header("x-witness-build"),
            reports: batch.reports,
        });
        (state.script.pop_front().unwrap_or(200), state.delay)
    };

    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, format!("mock says {}", status.as_u16()))
}

// ── Pipeline helpers ──────────────────────────────────────────────────────────

pub fn credentials() -> Credentials {
    let mut config = WitnessConfig::default();
    config.credentials.api_key_id = API_KEY_ID.to_string();
    config.credentials.api_key_secret = API_KEY_SECRET.to_string();
    config
        .credentials()
        .expect("test credentials are non-empty")
}

/// Transport with short waits so retry tests stay fast.
pub fn fast_transport() -> TransportConfig {
    TransportConfig {
        retry_wait_min_ms: 10,
        retry_wait_max_ms: 50,
        ..Default::default()
    }
}

pub fn client(mock: &MockLearnService) -> Arc<RestLearnClient> {
    Arc::new(
        RestLearnClient::new(&mock.base_url(), credentials(), &fast_transport())
            .expect("mock base URL is valid"),
    )
}

/// A collector wired to the mock through the real uploader and client.
pub fn collector(
    mock: &MockLearnService,
    session: &LearnSessionId,
    direction: NetworkDirection,
) -> WitnessCollector {
    let stats = CollectorStats::shared();
    let client: Arc<dyn LearnClient> = client(mock);
    let uploader = WitnessUploader::new(
        client,
        session.clone(),
        direction,
        Duration::from_secs(5),
        stats.clone(),
    );
    WitnessCollector::new(
        direction,
        CollectorSettings::default(),
        uploader,
        PluginChain::new(),
        NoRedaction,
        stats,
    )
}
