//! Raw frames: one observed protocol message plus the addressing it was
//! seen with.
//!
//! A frame is produced by a capture loop (or the replay adapter) in arrival
//! order. Only HTTP is understood today; everything else is carried as
//! `Unrecognized` so collectors can skip it cheaply.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One observed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkTraffic {
    pub observation_time: DateTime<Utc>,
    pub src: SocketAddr,
    pub dst: SocketAddr,
    pub content: NetworkContent,
}

/// Protocol-specific content of a frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum NetworkContent {
    HttpRequest(HttpRequest),
    HttpResponse(HttpResponse),
    /// Traffic no collector understands yet (TLS, raw TCP segments, ...).
    Unrecognized,
}

/// A single header line. Order and duplicates are preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The request half of an HTTP exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequest {
    /// Identifies the TCP stream (or archive) the request was read from.
    pub stream_id: Uuid,
    /// Position of the request within its stream.
    pub seq: u64,
    pub method: String,
    pub host: String,
    pub path: String,
    #[serde(default)]
    pub query: Vec<(String, String)>,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default, with = "base64_bytes")]
    pub body: Vec<u8>,
}

/// The response half of an HTTP exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponse {
    pub stream_id: Uuid,
    pub seq: u64,
    pub status_code: u16,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default, with = "base64_bytes")]
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Case-insensitive lookup of the first header with this name.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Placeholder address for frames whose addressing is unknown, e.g. entries
/// replayed from an archive that never recorded it.
pub fn unspecified_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
}

/// Serde helper: byte buffers travel as standard base64 strings in JSON.
pub(crate) mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        base64::decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}
