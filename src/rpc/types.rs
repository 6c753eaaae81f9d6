use serde::{Deserialize, Serialize};
use std::fmt;

pub const JSONRPC_VERSION: &str = "2.0";

pub const METHOD_NOT_FOUND: i64 = -32601;

/// Correlation ID linking a call to its response. Numbers and strings are both
/// accepted from peers; our own calls always use numbers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum Id {
    Number(i64),
    String(String),
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Number(n) => write!(f, "{}", n),
            Id::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Number(n)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::String(s.to_string())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Request {
    pub jsonrpc: String,
    pub id: Id,
    pub method: String,
    #[serde(default, skip_serializing_if = "params_absent")]
    pub params: Option<serde_json::Value>,
}

fn params_absent(params: &Option<serde_json::Value>) -> bool {
    matches!(params, None | Some(serde_json::Value::Null))
}

/// `null` params are encoded as absent, so they are stored as absent too.
fn normalize_params(params: Option<serde_json::Value>) -> Option<serde_json::Value> {
    params.filter(|p| !p.is_null())
}

impl Request {
    pub fn new(id: Id, method: &str, params: Option<serde_json::Value>) -> Self {
        Request {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params: normalize_params(params),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "params_absent")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(method: &str, params: Option<serde_json::Value>) -> Self {
        Notification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params: normalize_params(params),
        }
    }
}

/// The `error` member of a failed response.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        ErrorObject {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        ErrorObject::new(METHOD_NOT_FOUND, format!("method not found: {}", method))
    }
}

/// A response carries exactly one of `result` or `error`, which is why the
/// outcome is a `Result` rather than two optional fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Id,
    pub outcome: Result<serde_json::Value, ErrorObject>,
}

impl Response {
    pub fn success(id: Id, result: serde_json::Value) -> Self {
        Response {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            outcome: Ok(result),
        }
    }

    pub fn failure(id: Id, error: ErrorObject) -> Self {
        Response {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            outcome: Err(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Call(Request),
    Notification(Notification),
    Response(Response),
}
