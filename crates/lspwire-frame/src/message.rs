use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC protocol version carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Invalid JSON was received by the server.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist or is not available.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;
/// LSP: a request arrived before `initialize` completed.
pub const SERVER_NOT_INITIALIZED: i64 = -32002;
/// LSP: generic error code.
pub const UNKNOWN_ERROR_CODE: i64 = -32001;
/// LSP: the request was cancelled by the client.
pub const REQUEST_CANCELLED: i64 = -32800;

/// Request identifier, either a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(i64),
    String(String),
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Number(n) => write!(f, "{n}"),
            Id::String(s) => write!(f, "\"{s}\""),
        }
    }
}

impl From<i64> for Id {
    fn from(value: i64) -> Self {
        Id::Number(value)
    }
}

impl From<i32> for Id {
    fn from(value: i32) -> Self {
        Id::Number(i64::from(value))
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Id::String(value.to_string())
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Id::String(value)
    }
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A call expecting a response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: Id,
    pub method: String,
    pub params: Option<Value>,
}

impl Request {
    /// Build a request. `Value::Null` params are omitted on the wire.
    pub fn new(id: impl Into<Id>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params: non_null(params),
        }
    }
}

/// A reply to a [`Request`].
///
/// `id` is `None` when the peer could not determine the request id (for
/// example a parse error); such a response can never be correlated.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: Option<Id>,
    pub result: Result<Value, ResponseError>,
}

impl Response {
    pub fn success(id: impl Into<Id>, result: Value) -> Self {
        Self {
            id: Some(id.into()),
            result: Ok(result),
        }
    }

    pub fn failure(id: impl Into<Id>, error: ResponseError) -> Self {
        Self {
            id: Some(id.into()),
            result: Err(error),
        }
    }
}

/// A one-way message. Never carries an id, never answered.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params: non_null(params),
        }
    }
}

/// One JSON-RPC message unit.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Envelope {
    /// The id of a request or response, if any.
    pub fn id(&self) -> Option<&Id> {
        match self {
            Envelope::Request(req) => Some(&req.id),
            Envelope::Response(resp) => resp.id.as_ref(),
            Envelope::Notification(_) => None,
        }
    }

    /// The method of a request or notification.
    pub fn method(&self) -> Option<&str> {
        match self {
            Envelope::Request(req) => Some(&req.method),
            Envelope::Notification(note) => Some(&note.method),
            Envelope::Response(_) => None,
        }
    }

    /// Short lowercase name of the variant, used in logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Request(_) => "request",
            Envelope::Response(_) => "response",
            Envelope::Notification(_) => "notification",
        }
    }
}

impl From<Request> for Envelope {
    fn from(value: Request) -> Self {
        Envelope::Request(value)
    }
}

impl From<Response> for Envelope {
    fn from(value: Response) -> Self {
        Envelope::Response(value)
    }
}

impl From<Notification> for Envelope {
    fn from(value: Notification) -> Self {
        Envelope::Notification(value)
    }
}

fn non_null(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        other => Some(other),
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Option<&'a Id>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ResponseError>,
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            Envelope::Request(req) => WireMessage {
                jsonrpc: JSONRPC_VERSION,
                id: Some(Some(&req.id)),
                method: Some(&req.method),
                params: req.params.as_ref(),
                result: None,
                error: None,
            },
            // A response always carries `id`, serialized as null when unknown.
            Envelope::Response(resp) => WireMessage {
                jsonrpc: JSONRPC_VERSION,
                id: Some(resp.id.as_ref()),
                method: None,
                params: None,
                result: resp.result.as_ref().ok(),
                error: resp.result.as_ref().err(),
            },
            Envelope::Notification(note) => WireMessage {
                jsonrpc: JSONRPC_VERSION,
                id: None,
                method: Some(&note.method),
                params: note.params.as_ref(),
                result: None,
                error: None,
            },
        };
        wire.serialize(serializer)
    }
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default, deserialize_with = "present")]
    id: Option<Option<Id>>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ResponseError>,
}

/// Distinguishes an explicit `null` from an absent field.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawMessage::deserialize(deserializer)?;

        if let Some(version) = raw.jsonrpc.as_deref() {
            if version != JSONRPC_VERSION {
                return Err(de::Error::custom(format!(
                    "unsupported jsonrpc version '{version}'"
                )));
            }
        }

        match (raw.method, raw.id, raw.result, raw.error) {
            (Some(method), Some(Some(id)), None, None) => Ok(Envelope::Request(Request {
                id,
                method,
                params: raw.params,
            })),
            (Some(method), None | Some(None), None, None) => {
                Ok(Envelope::Notification(Notification {
                    method,
                    params: raw.params,
                }))
            }
            (None, Some(id), Some(result), None) => Ok(Envelope::Response(Response {
                id,
                result: Ok(result),
            })),
            (None, Some(id), None, Some(error)) => Ok(Envelope::Response(Response {
                id,
                result: Err(error),
            })),
            (None, Some(_), Some(_), Some(_)) => Err(de::Error::custom(
                "response carries both 'result' and 'error'",
            )),
            (Some(_), _, _, _) => Err(de::Error::custom(
                "message carries both 'method' and a response payload",
            )),
            _ => Err(de::Error::custom(
                "message is neither a request, a response nor a notification",
            )),
        }
    }
}
