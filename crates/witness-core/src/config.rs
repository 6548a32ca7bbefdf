//! Configuration system for the witness collector.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $WITNESS_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/witness/config.toml
//!   3. ~/.config/witness/config.toml

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::wire::{
    PAIR_CACHE_CLEANUP_INTERVAL_SECS, PAIR_CACHE_EXPIRATION_SECS, REPORT_TIMEOUT_SECS,
    UPLOAD_BATCH_FLUSH_SECS, UPLOAD_BATCH_MAX_SIZE,
};

pub const API_KEY_ID_ENV: &str = "WITNESS_API_KEY_ID";
pub const API_KEY_SECRET_ENV: &str = "WITNESS_API_KEY_SECRET";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WitnessConfig {
    pub learn: LearnConfig,
    pub credentials: CredentialsConfig,
    pub pairing: PairingConfig,
    pub upload: UploadConfig,
    pub transport: TransportConfig,
    pub filters: FilterConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnConfig {
    /// Base URL of the learn service.
    pub base_url: String,
    pub service_id: String,
    /// Learn session to report into. Empty = generate one per run.
    pub session_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub api_key_id: String,
    pub api_key_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Unpaired halves older than this are shipped on their own.
    pub expiration_secs: u64,
    /// Minimum wall-clock gap between two pair cache sweeps.
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub batch_max_size: usize,
    pub flush_interval_secs: u64,
    /// Deadline for one upload call, retries included.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub retry_max: u32,
    pub retry_wait_min_ms: u64,
    pub retry_wait_max_ms: u64,
    /// Deadline applied when the caller supplies none.
    pub default_timeout_secs: u64,
    pub max_idle_conns: usize,
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Regular expressions; matching HTTP paths are never reported.
    pub path_exclusions: Vec<String>,
    /// Regular expressions; matching HTTP hosts are never reported.
    pub host_exclusions: Vec<String>,
    /// Fraction of witnesses to keep, in [0.0, 1.0].
    pub sample_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Local status endpoint port. 0 = disabled.
    pub status_port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for LearnConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.witness.local".to_string(),
            service_id: String::new(),
            session_id: String::new(),
        }
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            expiration_secs: PAIR_CACHE_EXPIRATION_SECS,
            cleanup_interval_secs: PAIR_CACHE_CLEANUP_INTERVAL_SECS,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            batch_max_size: UPLOAD_BATCH_MAX_SIZE,
            flush_interval_secs: UPLOAD_BATCH_FLUSH_SECS,
            request_timeout_secs: REPORT_TIMEOUT_SECS,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            retry_max: 3,
            retry_wait_min_ms: 100,
            retry_wait_max_ms: 1_000,
            default_timeout_secs: 5,
            max_idle_conns: 3,
            idle_timeout_secs: 60,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            path_exclusions: Vec::new(),
            host_exclusions: Vec::new(),
            sample_rate: 1.0,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { status_port: 9101 }
    }
}

// ── Durations ─────────────────────────────────────────────────────────────────

impl PairingConfig {
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl UploadConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl TransportConfig {
    pub fn retry_wait_min(&self) -> Duration {
        Duration::from_millis(self.retry_wait_min_ms)
    }

    pub fn retry_wait_max(&self) -> Duration {
        Duration::from_millis(self.retry_wait_max_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

// ── Credentials ───────────────────────────────────────────────────────────────

/// Validated API credentials. Only obtainable through
/// [`WitnessConfig::credentials`], so holding one means both parts are set.
#[derive(Clone)]
pub struct Credentials {
    key_id: String,
    secret: String,
}

impl Credentials {
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key_id", &self.key_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("witness")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("API key ID not found, set WITNESS_API_KEY_ID or [credentials] api_key_id")]
    MissingApiKeyId,
    #[error("API key secret not found, set WITNESS_API_KEY_SECRET or [credentials] api_key_secret")]
    MissingApiKeySecret,
    #[error("sample_rate must be within [0.0, 1.0], got {0}")]
    InvalidSampleRate(f64),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl WitnessConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            WitnessConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("WITNESS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&WitnessConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Credentials for the learn service. Missing credentials are fatal:
    /// callers check this before any ingestion starts.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let key_id = self.credentials.api_key_id.trim();
        if key_id.is_empty() {
            return Err(ConfigError::MissingApiKeyId);
        }
        let secret = self.credentials.api_key_secret.trim();
        if secret.is_empty() {
            return Err(ConfigError::MissingApiKeySecret);
        }
        Ok(Credentials {
            key_id: key_id.to_string(),
            secret: secret.to_string(),
        })
    }

    /// Reject values that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rate = self.filters.sample_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(ConfigError::InvalidSampleRate(rate));
        }
        Ok(())
    }

    /// Apply WITNESS_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var(API_KEY_ID_ENV) {
            self.credentials.api_key_id = v;
        }
        if let Ok(v) = std::env::var(API_KEY_SECRET_ENV) {
            self.credentials.api_key_secret = v;
        }
        if let Ok(v) = std::env::var("WITNESS_LEARN__BASE_URL") {
            self.learn.base_url = v;
        }
        if let Ok(v) = std::env::var("WITNESS_LEARN__SERVICE_ID") {
            self.learn.service_id = v;
        }
        if let Ok(v) = std::env::var("WITNESS_LEARN__SESSION_ID") {
            self.learn.session_id = v;
        }
        if let Ok(v) = std::env::var("WITNESS_UPLOAD__BATCH_MAX_SIZE") {
            if let Ok(n) = v.parse() {
                self.upload.batch_max_size = n;
            }
        }
        if let Ok(v) = std::env::var("WITNESS_FILTERS__SAMPLE_RATE") {
            if let Ok(r) = v.parse() {
                self.filters.sample_rate = r;
            }
        }
        if let Ok(v) = std::env::var("WITNESS_API__STATUS_PORT") {
            if let Ok(p) = v.parse() {
                self.api.status_port = p;
            }
        }
    }
}
