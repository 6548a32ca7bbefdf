//! Parser capability: turns one side of an HTTP exchange into a
//! `PartialWitness` keyed for pairing.
//!
//! `HttpParser` is the built-in mapping. Alternative mappings plug in
//! through the `Parser` trait; the collector only relies on the pair key,
//! the side, and `merge`.
//!
//! Arguments are keyed `query.<name>`, `header.<lowercase name>`,
//! `cookie.<name>` and `body`. A name seen more than once keeps every
//! value: the first occurrence uses the plain key, later ones get `#1`,
//! `#2`, and so on.

use std::collections::BTreeMap;

use witness_core::witness::{Data, HttpMethodMeta, Location, Method, Value};
use witness_core::{merge, HttpRequest, HttpResponse, PairKey, PartialWitness, Side, Witness};

/// Converts single HTTP messages into partial witnesses.
pub trait Parser: Send + Sync {
    fn parse_request(&self, req: &HttpRequest) -> Result<PartialWitness, ParseError>;

    fn parse_response(&self, resp: &HttpResponse) -> Result<PartialWitness, ParseError>;

    /// Combine the cached half with the newly arrived one.
    fn merge(&self, existing: Witness, incoming: Witness) -> Witness {
        merge(existing, incoming)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid HTTP method {0:?}")]
    InvalidMethod(String),

    #[error("request path must start with '/', got {0:?}")]
    InvalidPath(String),

    #[error("invalid HTTP status code {0}")]
    InvalidStatus(u16),

    #[error("body declared as JSON could not be decoded: {0}")]
    InvalidJsonBody(#[source] serde_json::Error),
}

/// Default HTTP-to-witness mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpParser;

impl Parser for HttpParser {
    fn parse_request(&self, req: &HttpRequest) -> Result<PartialWitness, ParseError> {
        if req.method.is_empty() || !req.method.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(ParseError::InvalidMethod(req.method.clone()));
        }
        if !req.path.starts_with('/') {
            return Err(ParseError::InvalidPath(req.path.clone()));
        }

        let mut args = BTreeMap::new();
        for (key, value) in &req.query {
            insert_arg(
                &mut args,
                format!("query.{key}"),
                Data {
                    location: Location::Query { key: key.clone() },
                    value: Value::String(value.clone()),
                },
            );
        }

        for header in &req.headers {
            let name = header.name.to_ascii_lowercase();
            if name == "cookie" {
                for (key, value) in parse_cookies(&header.value) {
                    insert_arg(
                        &mut args,
                        format!("cookie.{key}"),
                        Data {
                            location: Location::Cookie { key },
                            value: Value::String(value),
                        },
                    );
                }
                continue;
            }
            insert_arg(
                &mut args,
                format!("header.{name}"),
                Data {
                    location: Location::Header { key: name },
                    value: Value::String(header.value.clone()),
                },
            );
        }

        if let Some(body) = body_data(req.content_type(), &req.body)? {
            args.insert("body".to_string(), body);
        }

        Ok(PartialWitness {
            pair_key: PairKey::new(req.stream_id, req.seq),
            side: Side::Request,
            witness: Witness {
                method: Method {
                    meta: Some(HttpMethodMeta {
                        verb: req.method.to_ascii_uppercase(),
                        host: req.host.clone(),
                        path: req.path.clone(),
                    }),
                    args,
                    ..Default::default()
                },
            },
        })
    }

    fn parse_response(&self, resp: &HttpResponse) -> Result<PartialWitness, ParseError> {
        if !(100..=599).contains(&resp.status_code) {
            return Err(ParseError::InvalidStatus(resp.status_code));
        }

        let mut responses = BTreeMap::new();
        for header in &resp.headers {
            let name = header.name.to_ascii_lowercase();
            insert_arg(
                &mut responses,
                format!("header.{name}"),
                Data {
                    location: Location::Header { key: name },
                    value: Value::String(header.value.clone()),
                },
            );
        }

        if let Some(body) = body_data(resp.content_type(), &resp.body)? {
            responses.insert("body".to_string(), body);
        }

        Ok(PartialWitness {
            pair_key: PairKey::new(resp.stream_id, resp.seq),
            side: Side::Response,
            witness: Witness {
                method: Method {
                    status: Some(resp.status_code),
                    responses,
                    ..Default::default()
                },
            },
        })
    }
}

fn insert_arg(args: &mut BTreeMap<String, Data>, key: String, data: Data) {
    if !args.contains_key(&key) {
        args.insert(key, data);
        return;
    }
    let mut n = 1;
    while args.contains_key(&format!("{key}#{n}")) {
        n += 1;
    }
    args.insert(format!("{key}#{n}"), data);
}

fn parse_cookies(header: &str) -> Vec<(String, String)> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

fn body_data(content_type: Option<&str>, body: &[u8]) -> Result<Option<Data>, ParseError> {
    if body.is_empty() {
        return Ok(None);
    }
    let content_type = content_type.unwrap_or("application/octet-stream");

    let value = if is_json(content_type) {
        let json: serde_json::Value =
            serde_json::from_slice(body).map_err(ParseError::InvalidJsonBody)?;
        Value::from_json(json)
    } else {
        match std::str::from_utf8(body) {
            Ok(text) => Value::String(text.to_string()),
            Err(_) => Value::Bytes(body.to_vec()),
        }
    };

    Ok(Some(Data {
        location: Location::Body {
            content_type: content_type.to_string(),
        },
        value,
    }))
}

fn is_json(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}
