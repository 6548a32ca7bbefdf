//! Witness model: one observed API call, built up from its request and
//! response halves.
//!
//! A `PartialWitness` carries one half plus the `PairKey` that links it to
//! the other half. Halves are combined with [`merge`], a pure function with
//! explicit per-field precedence so every merge case can be tested on its own.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Links a request to its response. Both halves of one exchange carry the
/// identical key; keys are unique within a capture or replay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    pub stream_id: Uuid,
    pub seq: u64,
}

impl PairKey {
    pub fn new(stream_id: Uuid, seq: u64) -> Self {
        Self { stream_id, seq }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wit_{}_{}", self.stream_id.simple(), self.seq)
    }
}

/// Which half of an exchange a fragment holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Request,
    Response,
}

/// One half of an exchange, as produced by a parser.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialWitness {
    pub pair_key: PairKey,
    pub side: Side,
    pub witness: Witness,
}

/// A (possibly incomplete) record of one API call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Witness {
    pub method: Method,
}

/// The call itself: what was invoked, with which arguments, and what came back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Method {
    /// Request line. Present once the request half is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<HttpMethodMeta>,

    /// Response status. Present once the response half is known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// Request data keyed by location, e.g. `query.limit`, `header.accept`, `body`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, Data>,

    /// Response data keyed the same way.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub responses: BTreeMap<String, Data>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpMethodMeta {
    pub verb: String,
    pub host: String,
    pub path: String,
}

/// A value together with where in the HTTP message it was found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Data {
    pub location: Location,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Location {
    Query { key: String },
    Header { key: String },
    Cookie { key: String },
    Body { content_type: String },
}

/// Structured payload value. Maps are ordered so serialization is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Double(f64),
    String(String),
    Bytes(#[serde(with = "crate::frame::base64_bytes")] Vec<u8>),
    List(Vec<Value>),
    Struct(BTreeMap<String, Value>),
}

impl Value {
    /// Convert a decoded JSON document.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int64(i),
                None => Value::Double(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(fields) => Value::Struct(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl Witness {
    pub fn has_request(&self) -> bool {
        self.method.meta.is_some()
    }

    pub fn has_response(&self) -> bool {
        self.method.status.is_some()
    }

    /// True once both halves have been merged in.
    pub fn is_complete(&self) -> bool {
        self.has_request() && self.has_response()
    }
}

/// Merge two halves of the same exchange.
///
/// Fields known on only one side are kept. When both sides know a field,
/// `later` (the most recently arrived half) wins.
pub fn merge(earlier: Witness, later: Witness) -> Witness {
    let Method {
        meta,
        status,
        mut args,
        mut responses,
    } = earlier.method;
    let later = later.method;

    args.extend(later.args);
    responses.extend(later.responses);

    Witness {
        method: Method {
            meta: later.meta.or(meta),
            status: later.status.or(status),
            args,
            responses,
        },
    }
}
