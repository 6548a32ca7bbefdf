//! Learn service client: submits witness reports over authenticated HTTP.
//!
//! Transient failures (connection errors, timeouts, 429, 5xx) are retried
//! with exponential backoff. Once retries run out the last response is
//! passed through and mapped to a `ClientError`. Every call runs under an
//! overall deadline: the caller's, or the configured default.

use std::time::Duration;

use async_trait::async_trait;
use exponential_backoff::Backoff;
use reqwest::StatusCode;
use url::Url;

use witness_core::config::{Credentials, TransportConfig};
use witness_core::wire::ReportBatch;
use witness_core::{LearnSessionId, WitnessReport};

/// Header carrying the build that produced a request.
pub const BUILD_HEADER: &str = "x-witness-build";

#[async_trait]
pub trait LearnClient: Send + Sync {
    /// Submit reports in order. `deadline` bounds the whole call,
    /// retries included; `None` means the client's default.
    async fn report_witnesses(
        &self,
        session: &LearnSessionId,
        reports: Vec<WitnessReport>,
        deadline: Option<Duration>,
    ) -> Result<(), ClientError>;
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(
        "the learn service rejected the API credentials (HTTP 401); \
         check WITNESS_API_KEY_ID and WITNESS_API_KEY_SECRET"
    )]
    Unauthorized,

    #[error("learn service returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("request to learn service failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("request to learn service did not finish within {0:?}")]
    DeadlineExceeded(Duration),

    #[error("invalid learn service URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

// ── Retry policy ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    max_wait: Duration,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, min_wait: Duration, max_wait: Duration) -> Self {
        Self {
            max_retries,
            max_wait,
            backoff: Backoff::new(max_retries.saturating_add(1), min_wait, Some(max_wait)),
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(
            config.retry_max,
            config.retry_wait_min(),
            config.retry_wait_max(),
        )
    }

    /// Wait before retry number `attempt` (1-based), or `None` once the
    /// retry budget is spent.
    pub fn wait(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }
        let wait = self.backoff.next(attempt).unwrap_or(self.max_wait);
        Some(wait.min(self.max_wait))
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request()
}

// ── REST client ───────────────────────────────────────────────────────────────

pub struct RestLearnClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
    retry: RetryPolicy,
    default_timeout: Duration,
    build: String,
}

impl RestLearnClient {
    pub fn new(
        base_url: &str,
        credentials: Credentials,
        transport: &TransportConfig,
    ) -> Result<Self, ClientError> {
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized).map_err(|source| ClientError::InvalidUrl {
            url: base_url.to_string(),
            source,
        })?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("witness/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(transport.max_idle_conns)
            .pool_idle_timeout(transport.idle_timeout())
            .build()
            .map_err(ClientError::Build)?;

        Ok(Self {
            http,
            base_url,
            credentials,
            retry: RetryPolicy::from_config(transport),
            default_timeout: transport.default_timeout(),
            build: build_id(),
        })
    }

    pub fn reports_url(&self, session: &LearnSessionId) -> Result<Url, ClientError> {
        let path = format!("v1/learn_sessions/{}/witness_reports", session.as_str());
        self.base_url
            .join(&path)
            .map_err(|source| ClientError::InvalidUrl { url: path, source })
    }

    async fn post_with_retries(&self, url: Url, body: &ReportBatch) -> Result<(), ClientError> {
        let mut attempt = 0u32;
        loop {
            let result = self
                .http
                .post(url.clone())
                .basic_auth(self.credentials.key_id(), Some(self.credentials.secret()))
                .header(BUILD_HEADER, &self.build)
                .json(body)
                .send()
                .await;

            let retryable = match &result {
                Ok(resp) => is_retryable_status(resp.status()),
                Err(e) => is_retryable_error(e),
            };

            if retryable {
                attempt += 1;
                if let Some(wait) = self.retry.wait(attempt) {
                    match &result {
                        Ok(resp) => tracing::debug!(
                            attempt,
                            ?wait,
                            status = resp.status().as_u16(),
                            "retrying learn service request"
                        ),
                        Err(e) => tracing::debug!(
                            attempt,
                            ?wait,
                            error = %e,
                            "retrying learn service request"
                        ),
                    }
                    tokio::time::sleep(wait).await;
                    continue;
                }
            }

            return check_status(result?).await;
        }
    }
}

#[async_trait]
impl LearnClient for RestLearnClient {
    async fn report_witnesses(
        &self,
        session: &LearnSessionId,
        reports: Vec<WitnessReport>,
        deadline: Option<Duration>,
    ) -> Result<(), ClientError> {
        let url = self.reports_url(session)?;
        let body = ReportBatch { reports };
        let deadline = deadline.unwrap_or(self.default_timeout);

        tokio::time::timeout(deadline, self.post_with_retries(url, &body))
            .await
            .map_err(|_| ClientError::DeadlineExceeded(deadline))?
    }
}

async fn check_status(resp: reqwest::Response) -> Result<(), ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(ClientError::Unauthorized);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Status {
        code: status.as_u16(),
        body,
    })
}

fn build_id() -> String {
    match option_env!("WITNESS_GIT_SHA") {
        Some(sha) => format!("{}+{}", env!("CARGO_PKG_VERSION"), sha),
        None => env!("CARGO_PKG_VERSION").to_string(),
    }
}
