//! Report wire format, i.e. what is sent to the learn service.
//!
//! A `WitnessReport` is one addressed, encoded witness. The `hash` is a
//! BLAKE3 digest of the serialized witness: the learn service uses it to
//! identify and deduplicate reports, so identical witness content must
//! always produce an identical hash and any change must produce a new one.
//! Witness maps are ordered, which keeps the serialization stable.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::witness::{PairKey, Witness};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Partial witnesses older than this are no longer worth waiting for.
pub const PAIR_CACHE_EXPIRATION_SECS: u64 = 60;

/// How often the pair cache is checked for stale entries.
pub const PAIR_CACHE_CLEANUP_INTERVAL_SECS: u64 = 30;

/// Max witnesses per upload batch.
pub const UPLOAD_BATCH_MAX_SIZE: usize = 10;

/// Max time a witness waits in the upload batch.
pub const UPLOAD_BATCH_FLUSH_SECS: u64 = 30;

/// Witnesses that may wait for the batch worker before new ones are shed.
pub const UPLOAD_QUEUE_CAPACITY: usize = 4096;

/// Flushed batches that may wait behind an in-flight upload.
pub const UPLOAD_BATCHES_IN_FLIGHT: usize = 4;

/// Deadline for one report upload call.
pub const REPORT_TIMEOUT_SECS: u64 = 30;

// ── Direction ─────────────────────────────────────────────────────────────────

/// Whether the observed service was receiving (inbound) or making
/// (outbound) the calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkDirection {
    Inbound,
    Outbound,
}

impl fmt::Display for NetworkDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkDirection::Inbound => f.write_str("inbound"),
            NetworkDirection::Outbound => f.write_str("outbound"),
        }
    }
}

// ── Learn session ─────────────────────────────────────────────────────────────

/// Identifies the learn session reports are filed under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LearnSessionId(String);

impl LearnSessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh, globally unique session id.
    pub fn generate() -> Self {
        Self(format!("lrn_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LearnSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Report ────────────────────────────────────────────────────────────────────

/// One witness, addressed and encoded for upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WitnessReport {
    pub direction: NetworkDirection,
    pub origin_addr: IpAddr,
    pub origin_port: u16,
    pub destination_addr: IpAddr,
    pub destination_port: u16,

    /// URL-safe base64 of the serialized witness.
    pub witness_encoded: String,
    pub client_witness_time: DateTime<Utc>,
    /// Hex BLAKE3 digest of the serialized witness.
    pub hash: String,
    pub id: String,
}

/// Body of a report upload call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportBatch {
    pub reports: Vec<WitnessReport>,
}

/// Serialized witness bytes together with their content hash.
#[derive(Debug, Clone)]
pub struct EncodedWitness {
    pub bytes: Vec<u8>,
    pub hash: String,
}

/// Serialize a witness and hash the result.
pub fn encode_witness(witness: &Witness) -> Result<EncodedWitness, ReportError> {
    let bytes = serde_json::to_vec(witness).map_err(ReportError::Serialize)?;
    let hash = hex::encode(blake3::hash(&bytes).as_bytes());
    Ok(EncodedWitness { bytes, hash })
}

/// Content hash of a witness.
pub fn witness_hash(witness: &Witness) -> Result<String, ReportError> {
    encode_witness(witness).map(|e| e.hash)
}

/// Decode the `witness_encoded` field of a report.
pub fn decode_witness(encoded: &str) -> Result<Witness, ReportError> {
    let bytes = base64::decode_config(encoded, base64::URL_SAFE)?;
    serde_json::from_slice(&bytes).map_err(ReportError::Deserialize)
}

impl WitnessReport {
    pub fn new(
        direction: NetworkDirection,
        origin: SocketAddr,
        destination: SocketAddr,
        observation_time: DateTime<Utc>,
        id: &PairKey,
        witness: &Witness,
    ) -> Result<Self, ReportError> {
        let encoded = encode_witness(witness)?;
        Ok(Self {
            direction,
            origin_addr: origin.ip(),
            origin_port: origin.port(),
            destination_addr: destination.ip(),
            destination_port: destination.port(),
            witness_encoded: base64::encode_config(&encoded.bytes, base64::URL_SAFE),
            client_witness_time: observation_time,
            hash: encoded.hash,
            id: id.to_string(),
        })
    }

    pub fn origin(&self) -> SocketAddr {
        SocketAddr::new(self.origin_addr, self.origin_port)
    }

    pub fn destination(&self) -> SocketAddr {
        SocketAddr::new(self.destination_addr, self.destination_port)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to serialize witness: {0}")]
    Serialize(serde_json::Error),

    #[error("failed to deserialize witness: {0}")]
    Deserialize(serde_json::Error),

    #[error("invalid witness encoding: {0}")]
    Encoding(#[from] base64::DecodeError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
