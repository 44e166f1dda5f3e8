//! Wire protocol for the cadence call/response and push-event substrate.
//!
//! Four message shapes travel over a connection:
//!
//! | Direction       | Shape                                         |
//! |-----------------|-----------------------------------------------|
//! | client → server | `{ "invoked": "svc.method", "args": [..], "id": 7 }` |
//! | server → client | `{ "id": 7, "result": .. }` / `{ "id": 7, "error": .. }` |
//! | server → client | `{ "token": "..", "settings": { .. } }` (handshake, once) |
//! | server → client | `["channel", payload]` (push event)           |
//!
//! Inbound frames are classified by [`classify`] in a fixed order so that a
//! frame is never both a response and a push event: arrays are push events,
//! objects with an `id` are responses, objects with a `token` are handshakes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifier embedded in a request and echoed by its response.
///
/// Allocated from a per-connection monotonic counter, so two live requests can
/// never share an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u64);

impl CorrelationId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Read an id echoed back by the server.
    ///
    /// Servers may echo the id as a JSON number or as a numeric string.
    pub fn from_wire(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().map(Self),
            Value::String(s) => s.parse().ok().map(Self),
            _ => None,
        }
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A dotted `service.method` path naming a backend method.
///
/// The service is everything before the first `.`; the method is the rest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MethodPath(String);

impl MethodPath {
    pub fn parse(path: &str) -> Result<Self> {
        match path.split_once('.') {
            Some((service, method)) if !service.is_empty() && !method.is_empty() => {
                Ok(Self(path.to_string()))
            }
            _ => Err(Error::invalid_method(path)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The service segment (`"tracks"` in `"tracks.getAll"`).
    pub fn service(&self) -> &str {
        self.split().0
    }

    /// The method segment (`"getAll"` in `"tracks.getAll"`).
    pub fn method(&self) -> &str {
        self.split().1
    }

    fn split(&self) -> (&str, &str) {
        // Validated in `parse`.
        self.0.split_once('.').unwrap_or((self.0.as_str(), ""))
    }
}

impl FromStr for MethodPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for MethodPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Settings snapshot delivered with the handshake.
pub type SettingsSnapshot = Map<String, Value>;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Client → server call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub invoked: MethodPath,
    pub args: Vec<Value>,
    pub id: CorrelationId,
}

impl Request {
    pub fn new(id: CorrelationId, invoked: MethodPath, args: Vec<Value>) -> Self {
        Self { invoked, args, id }
    }
}

/// Server → client answer to exactly one [`Request`].
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: CorrelationId,
    /// `Ok(result)` or `Err(error payload)`; the payload is opaque.
    pub outcome: std::result::Result<Value, Value>,
}

impl Response {
    pub fn success(id: CorrelationId, result: Value) -> Self {
        Self {
            id,
            outcome: Ok(result),
        }
    }

    pub fn failure(id: CorrelationId, error: Value) -> Self {
        Self {
            id,
            outcome: Err(error),
        }
    }

    /// Wire form: `{ "id", "result" }` or `{ "id", "error" }`.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("id".to_string(), Value::from(self.id.get()));
        match &self.outcome {
            Ok(result) => obj.insert("result".to_string(), result.clone()),
            Err(error) => obj.insert("error".to_string(), error.clone()),
        };
        Value::Object(obj)
    }
}

/// Sent once by the server right after a connection opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    pub token: String,
    #[serde(default)]
    pub settings: SettingsSnapshot,
}

/// Unsolicited server → client notification on a named channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub channel: String,
    pub payload: Value,
}

impl PushEvent {
    pub fn new(channel: impl Into<String>, payload: Value) -> Self {
        Self {
            channel: channel.into(),
            payload,
        }
    }

    /// Wire form: `[channel, payload]`.
    pub fn to_value(&self) -> Value {
        Value::Array(vec![Value::String(self.channel.clone()), self.payload.clone()])
    }
}

/// The result of classifying one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Response(Response),
    Handshake(Handshake),
    Push(PushEvent),
    /// A frame we could not interpret; kept for logging.
    Unknown(String),
}

// ---------------------------------------------------------------------------
// Encoding / classification
// ---------------------------------------------------------------------------

/// Serialize a request as a JSON text frame.
pub fn encode_request(request: &Request) -> Result<String> {
    Ok(serde_json::to_string(request)?)
}

/// Parse a raw text frame into a typed [`InboundMessage`].
pub fn parse_frame(text: &str) -> InboundMessage {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => classify(value),
        Err(_) => InboundMessage::Unknown(text.to_string()),
    }
}

/// Classify a decoded frame.
///
/// Precedence:
/// - JSON array `[string, any]` → [`InboundMessage::Push`]
/// - object with a non-null `id` → [`InboundMessage::Response`]
///   (`error` wins over `result`; `result: null` is a valid success)
/// - object with a string `token` → [`InboundMessage::Handshake`]
/// - anything else → [`InboundMessage::Unknown`]
pub fn classify(value: Value) -> InboundMessage {
    match value {
        Value::Array(items) => classify_push(items),
        Value::Object(obj) => {
            if obj.get("id").is_some_and(|id| !id.is_null()) {
                classify_response(obj)
            } else if obj.get("token").is_some_and(Value::is_string) {
                match serde_json::from_value::<Handshake>(Value::Object(obj)) {
                    Ok(handshake) => InboundMessage::Handshake(handshake),
                    Err(err) => InboundMessage::Unknown(format!("malformed handshake: {err}")),
                }
            } else {
                InboundMessage::Unknown(Value::Object(obj).to_string())
            }
        }
        other => InboundMessage::Unknown(other.to_string()),
    }
}

fn classify_push(items: Vec<Value>) -> InboundMessage {
    if items.len() != 2 {
        return InboundMessage::Unknown(Value::Array(items).to_string());
    }
    let mut iter = items.into_iter();
    match (iter.next(), iter.next()) {
        (Some(Value::String(channel)), Some(payload)) => {
            InboundMessage::Push(PushEvent { channel, payload })
        }
        (first, second) => InboundMessage::Unknown(
            Value::Array(first.into_iter().chain(second).collect()).to_string(),
        ),
    }
}

fn classify_response(mut obj: Map<String, Value>) -> InboundMessage {
    let id = match obj.get("id").and_then(CorrelationId::from_wire) {
        Some(id) => id,
        None => return InboundMessage::Unknown(Value::Object(obj).to_string()),
    };

    // A null `error` is the "no error" placeholder some servers always send.
    match obj.remove("error") {
        Some(error) if !error.is_null() => {
            return InboundMessage::Response(Response::failure(id, error));
        }
        _ => {}
    }

    if let Some(result) = obj.remove("result") {
        InboundMessage::Response(Response::success(id, result))
    } else {
        InboundMessage::Unknown(Value::Object(obj).to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
