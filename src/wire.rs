//! JSON-RPC 2.0 wire parsing
//!
//! Classifies raw message text into parsed items before dispatch. Parsing
//! never panics: malformed input becomes a [`ParsedItem::ParseError`] with
//! whatever request id could be recovered, and batch elements whose id is
//! unusable are dropped silently per JSON-RPC batch semantics.

use serde_json::Value;

use crate::error::JsonRpcError;
use crate::protocol::{JSONRPC_VERSION, RequestId};

/// A single classified JSON-RPC item
#[derive(Debug)]
pub enum ParsedItem {
    /// A request expecting exactly one response
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    /// A notification; never produces a response
    Notification { method: String, params: Value },
    /// A response from the client to a server-originated request
    ClientResponse {
        id: RequestId,
        result: Option<Value>,
        error: Option<JsonRpcError>,
    },
    /// A protocol-level failure to report (id echoes the envelope's id
    /// when one was recoverable)
    ParseError {
        id: Option<RequestId>,
        error: JsonRpcError,
    },
}

/// A parsed inbound message: one item, or an ordered batch of them
#[derive(Debug)]
pub struct ParsedMessage {
    /// True when the top-level value was a JSON array
    pub batch: bool,
    pub items: Vec<ParsedItem>,
}

impl ParsedMessage {
    fn single(item: ParsedItem) -> Self {
        Self {
            batch: false,
            items: vec![item],
        }
    }
}

/// Parse one message text into classified items.
pub fn parse_message(text: &str) -> ParsedMessage {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            return ParsedMessage::single(ParsedItem::ParseError {
                id: None,
                error: JsonRpcError::parse_error(e.to_string()),
            });
        }
    };

    match value {
        Value::Array(elements) => {
            if elements.is_empty() {
                return ParsedMessage::single(ParsedItem::ParseError {
                    id: None,
                    error: JsonRpcError::invalid_request("Empty batch request"),
                });
            }
            let items = elements
                .into_iter()
                .filter_map(|e| classify(e, true))
                .collect();
            ParsedMessage {
                batch: true,
                items,
            }
        }
        other => match classify(other, false) {
            Some(item) => ParsedMessage::single(item),
            None => ParsedMessage {
                batch: false,
                items: Vec::new(),
            },
        },
    }
}

/// Extracted id: absent, usable, or present with an unusable type.
enum EnvelopeId {
    Absent,
    Null,
    Usable(RequestId),
    Invalid,
}

fn envelope_id(envelope: &Value) -> EnvelopeId {
    match envelope.get("id") {
        None => EnvelopeId::Absent,
        Some(Value::Null) => EnvelopeId::Null,
        Some(Value::String(s)) => EnvelopeId::Usable(RequestId::String(s.clone())),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => EnvelopeId::Usable(RequestId::Number(i)),
            None => EnvelopeId::Invalid,
        },
        Some(_) => EnvelopeId::Invalid,
    }
}

/// Classify a single decoded envelope.
///
/// Returns `None` when the envelope must be dropped silently: invalid
/// batch elements without a usable id, and malformed notifications.
fn classify(envelope: Value, in_batch: bool) -> Option<ParsedItem> {
    let id = envelope_id(&envelope);

    // Helper: report with echoed id at top level; drop id-less failures
    // inside a batch.
    let reject = |id: Option<RequestId>, error: JsonRpcError| -> Option<ParsedItem> {
        if in_batch && id.is_none() {
            None
        } else {
            Some(ParsedItem::ParseError { id, error })
        }
    };

    let Some(obj) = envelope.as_object() else {
        return reject(
            None,
            JsonRpcError::invalid_request("Expected a JSON-RPC object"),
        );
    };

    let echo_id = match &id {
        EnvelopeId::Usable(rid) => Some(rid.clone()),
        _ => None,
    };

    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return reject(
            echo_id,
            JsonRpcError::invalid_request("Invalid or missing jsonrpc version"),
        );
    }

    // id + result/error means the client is answering one of our requests
    if let EnvelopeId::Usable(rid) = &id
        && (obj.contains_key("result") || obj.contains_key("error"))
    {
        let error = obj
            .get("error")
            .and_then(|e| serde_json::from_value::<JsonRpcError>(e.clone()).ok());
        return Some(ParsedItem::ClientResponse {
            id: rid.clone(),
            result: obj.get("result").cloned(),
            error,
        });
    }

    if matches!(id, EnvelopeId::Invalid) {
        return reject(
            None,
            JsonRpcError::invalid_request("Request id must be a string, number, or null"),
        );
    }

    let method = match obj.get("method") {
        Some(Value::String(m)) => m.clone(),
        _ => {
            return match &id {
                EnvelopeId::Usable(rid) => reject(
                    Some(rid.clone()),
                    JsonRpcError::invalid_request("Missing or invalid method"),
                ),
                _ => None,
            };
        }
    };

    let params = match obj.get("params") {
        None => Value::Object(Default::default()),
        Some(p @ (Value::Object(_) | Value::Array(_))) => p.clone(),
        Some(_) => {
            return match &id {
                EnvelopeId::Usable(rid) => reject(
                    Some(rid.clone()),
                    JsonRpcError::invalid_request("Params must be an object or array"),
                ),
                _ => None,
            };
        }
    };

    match id {
        EnvelopeId::Usable(rid) => Some(ParsedItem::Request {
            id: rid,
            method,
            params,
        }),
        // An explicit null id cannot be correlated with a response, so the
        // envelope is handled as a notification.
        EnvelopeId::Absent | EnvelopeId::Null => {
            Some(ParsedItem::Notification { method, params })
        }
        EnvelopeId::Invalid => unreachable!("invalid ids rejected above"),
    }
}
