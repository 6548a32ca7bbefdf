//! Replay adapter: feeds a recorded HTTP archive through a collector.
//!
//! The archive is HAR-shaped JSON with a `_capture` extension object that
//! says whether the traffic was outbound. Every entry of one archive shares
//! a fresh stream id and uses its index as the sequence number, so request
//! and response of an entry pair up in the collector.
//!
//! Bad entries are counted and sampled, never fatal.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use witness_core::frame::unspecified_addr;
use witness_core::{Header, HttpRequest, HttpResponse, NetworkContent, NetworkTraffic};

use crate::collector::{Collector, ProcessOutcome};
use crate::sampled_err::SampledErrors;

// ── Archive format ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Archive {
    pub log: ArchiveLog,
    #[serde(rename = "_capture", default)]
    pub capture: CaptureExt,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureExt {
    #[serde(default)]
    pub outbound: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveLog {
    #[serde(default)]
    pub entries: Vec<ArchiveEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    pub started_date_time: DateTime<Utc>,
    #[serde(default)]
    pub request: Option<ArchiveRequest>,
    #[serde(default)]
    pub response: Option<ArchiveResponse>,
    #[serde(rename = "serverIPAddress", default)]
    pub server_ip_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub post_data: Option<PostData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostData {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveResponse {
    pub status: i64,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub content: Content,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub text: Option<String>,
    /// `base64` when `text` holds encoded binary content.
    #[serde(default)]
    pub encoding: Option<String>,
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("failed to read archive {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse archive {0}: {1}")]
    Parse(PathBuf, serde_json::Error),
}

/// An archive entry side that cannot be turned into a frame.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("invalid request URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("request URL {0:?} has no host")]
    MissingHost(String),
    #[error("invalid response status {0}")]
    InvalidStatus(i64),
    #[error("response content is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("unsupported content encoding {0:?}")]
    UnsupportedEncoding(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

pub fn load_archive(path: &Path) -> Result<Archive, ReplayError> {
    let bytes = std::fs::read(path).map_err(|e| ReplayError::Read(path.to_path_buf(), e))?;
    serde_json::from_slice(&bytes).map_err(|e| ReplayError::Parse(path.to_path_buf(), e))
}

// ── Conversion ────────────────────────────────────────────────────────────────

pub fn convert_request(
    req: &ArchiveRequest,
    stream_id: Uuid,
    seq: u64,
) -> Result<HttpRequest, ConvertError> {
    let url = Url::parse(&req.url).map_err(|source| ConvertError::InvalidUrl {
        url: req.url.clone(),
        source,
    })?;
    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => return Err(ConvertError::MissingHost(req.url.clone())),
    };

    let mut headers = req.headers.clone();
    let mut body = Vec::new();
    if let Some(post) = &req.post_data {
        body = post.text.clone().into_bytes();
        if !post.mime_type.is_empty() && !has_header(&headers, "content-type") {
            headers.push(Header::new("Content-Type", post.mime_type.clone()));
        }
    }

    Ok(HttpRequest {
        stream_id,
        seq,
        method: req.method.clone(),
        host,
        path: url.path().to_string(),
        query: url.query_pairs().into_owned().collect(),
        headers,
        body,
    })
}

pub fn convert_response(
    resp: &ArchiveResponse,
    stream_id: Uuid,
    seq: u64,
) -> Result<HttpResponse, ConvertError> {
    let status_code = u16::try_from(resp.status)
        .ok()
        .filter(|s| (100..=599).contains(s))
        .ok_or(ConvertError::InvalidStatus(resp.status))?;

    let text = resp.content.text.as_deref().unwrap_or_default();
    let body = match resp.content.encoding.as_deref() {
        None | Some("") => text.as_bytes().to_vec(),
        Some("base64") => base64::decode(text)?,
        Some(other) => return Err(ConvertError::UnsupportedEncoding(other.to_string())),
    };

    let mut headers = resp.headers.clone();
    if !resp.content.mime_type.is_empty() && !has_header(&headers, "content-type") {
        headers.push(Header::new("Content-Type", resp.content.mime_type.clone()));
    }

    Ok(HttpResponse {
        stream_id,
        seq,
        status_code,
        headers,
        body,
    })
}

fn has_header(headers: &[Header], name: &str) -> bool {
    headers.iter().any(|h| h.name.eq_ignore_ascii_case(name))
}

/// Server address recorded for an entry, if any. The client side of a
/// replayed exchange is never known.
fn server_addr(entry: &ArchiveEntry) -> SocketAddr {
    let ip = entry
        .server_ip_address
        .as_deref()
        .and_then(|s| s.trim_matches(|c: char| c == '[' || c == ']').parse::<IpAddr>().ok());
    let port = entry
        .request
        .as_ref()
        .and_then(|r| Url::parse(&r.url).ok())
        .and_then(|u| u.port_or_known_default())
        .unwrap_or(0);
    match ip {
        Some(ip) => SocketAddr::new(ip, port),
        None => unspecified_addr(),
    }
}

// ── Replay ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    pub successful_entries: usize,
    pub total_entries: usize,
    pub errors: SampledErrors,
}

impl ReplayReport {
    pub fn failed_entries(&self) -> usize {
        self.total_entries - self.successful_entries
    }
}

/// Replay an archive into the collector matching its recorded direction.
pub fn replay_archive<'a>(
    archive: &Archive,
    inbound: &'a mut dyn Collector,
    outbound: &'a mut dyn Collector,
) -> ReplayReport {
    let collector = if archive.capture.outbound {
        outbound
    } else {
        inbound
    };
    replay_entries(&archive.log.entries, collector)
}

/// Feed entries in order. An entry counts as successful only if every side
/// it carries converted and parsed.
pub fn replay_entries(entries: &[ArchiveEntry], collector: &mut dyn Collector) -> ReplayReport {
    let stream_id = Uuid::new_v4();
    let mut report = ReplayReport {
        total_entries: entries.len(),
        ..Default::default()
    };

    for (index, entry) in entries.iter().enumerate() {
        let seq = index as u64;
        let server = server_addr(entry);
        let client = unspecified_addr();
        let mut ok = true;

        if let Some(req) = &entry.request {
            let traffic = convert_request(req, stream_id, seq).map(|r| NetworkTraffic {
                observation_time: entry.started_date_time,
                src: client,
                dst: server,
                content: NetworkContent::HttpRequest(r),
            });
            ok &= feed(collector, traffic, index, "request", &mut report.errors);
        }

        if let Some(resp) = &entry.response {
            let traffic = convert_response(resp, stream_id, seq).map(|r| NetworkTraffic {
                observation_time: entry.started_date_time,
                src: server,
                dst: client,
                content: NetworkContent::HttpResponse(r),
            });
            ok &= feed(collector, traffic, index, "response", &mut report.errors);
        }

        if ok {
            report.successful_entries += 1;
        }
    }

    report
}

fn feed(
    collector: &mut dyn Collector,
    traffic: Result<NetworkTraffic, ConvertError>,
    index: usize,
    side: &str,
    errors: &mut SampledErrors,
) -> bool {
    let traffic = match traffic {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!(index, side, error = %e, "failed to convert archive entry");
            errors.add(format!("entry {index} {side}: {e}"));
            return false;
        }
    };
    match collector.process(traffic) {
        ProcessOutcome::ParseFailed(e) => {
            errors.add(format!("entry {index} {side}: {e}"));
            false
        }
        _ => true,
    }
}
