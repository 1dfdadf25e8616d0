//! JSON-RPC 2.0 base types.
//!
//! Parsing validates the request shape and reports `Invalid Request`
//! errors; serialization is its structural inverse and never writes absent
//! optional members as `null` (the one exception is a request that
//! explicitly carried `"id": null`).

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};

use crate::error::{MalformedResponse, RpcError};

/// The literal protocol version carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request id: a string, a number, or an explicit `null`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(Number),
    String(String),
    Null,
}

impl Id {
    /// Read an id from a raw value, accepting only strings, numbers and null.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(Self::Number(n.clone())),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Null => Some(Self::Null),
            _ => None,
        }
    }

    /// Best-effort id of a message that failed validation, `Null` when the
    /// id is missing or not a legal id.
    pub fn recover(value: &Value) -> Self {
        value
            .get("id")
            .and_then(Self::from_value)
            .unwrap_or(Self::Null)
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::Null => Value::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<u64> for Id {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Null => f.write_str("null"),
        }
    }
}

/// Request parameters: positional or named, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Params {
    Array(Vec<Value>),
    Object(Map<String, Value>),
}

impl Params {
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(Self::Array(items)),
            Value::Object(map) => Some(Self::Object(map)),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Array(items) => Value::Array(items.clone()),
            Self::Object(map) => Value::Object(map.clone()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Array(items) => items.len(),
            Self::Object(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<Value>> for Params {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Self::Object(map)
    }
}

/// Local, never-serialized values attached to a request by a transport or
/// a middleware (auth tokens, timing marks).
pub type Metadata = HashMap<String, Value>;

/// JSON-RPC 2.0 request. An `id` of `None` marks a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub params: Option<Params>,
    pub id: Option<Id>,
    pub meta: Metadata,
}

impl Request {
    pub fn new(method: impl Into<String>, params: Option<Params>, id: impl Into<Id>) -> Self {
        Self {
            method: method.into(),
            params,
            id: Some(id.into()),
            meta: Metadata::new(),
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Params>) -> Self {
        Self {
            method: method.into(),
            params,
            id: None,
            meta: Metadata::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Id used for a reply. Notifications never get one sent, but hooks
    /// still see a response keyed to `null`.
    pub fn reply_id(&self) -> Id {
        self.id.clone().unwrap_or(Id::Null)
    }

    /// Validate and convert a raw value into a request.
    ///
    /// Fails with `Invalid Request` (-32600) when the value is not an object,
    /// `jsonrpc` is not `"2.0"`, `method` is not a non-empty string, `params`
    /// is neither array nor object, or `id` is not a string, number or null.
    pub fn from_value(value: Value) -> Result<Self, RpcError> {
        let Value::Object(mut obj) = value else {
            return Err(RpcError::invalid_request("request must be a JSON object"));
        };

        match obj.get("jsonrpc") {
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            _ => return Err(RpcError::invalid_request("jsonrpc must be \"2.0\"")),
        }

        let method = match obj.remove("method") {
            Some(Value::String(m)) if !m.is_empty() => m,
            _ => {
                return Err(RpcError::invalid_request(
                    "method must be a non-empty string",
                ));
            }
        };

        let params = match obj.remove("params") {
            None => None,
            Some(raw) => Some(Params::from_value(raw).ok_or_else(|| {
                RpcError::invalid_request("params must be an array or an object")
            })?),
        };

        let id = match obj.get("id") {
            None => None,
            Some(raw) => Some(Id::from_value(raw).ok_or_else(|| {
                RpcError::invalid_request("id must be a string, a number or null")
            })?),
        };

        Ok(Self {
            method,
            params,
            id,
            meta: Metadata::new(),
        })
    }

    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), Value::String(JSONRPC_VERSION.into()));
        obj.insert("method".into(), Value::String(self.method.clone()));
        if let Some(params) = &self.params {
            obj.insert("params".into(), params.to_value());
        }
        if let Some(id) = &self.id {
            obj.insert("id".into(), id.to_value());
        }
        Value::Object(obj)
    }
}

impl Serialize for Request {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Request {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}

/// JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Params>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Params>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    pub fn into_request(self) -> Request {
        Request::notification(self.method, self.params)
    }

    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), Value::String(JSONRPC_VERSION.into()));
        obj.insert("method".into(), Value::String(self.method.clone()));
        if let Some(params) = &self.params {
            obj.insert("params".into(), params.to_value());
        }
        Value::Object(obj)
    }
}

impl Serialize for Notification {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

/// Exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Result(Value),
    Error(RpcError),
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: Id,
    pub outcome: Outcome,
}

impl Response {
    pub fn success(id: Id, result: Value) -> Self {
        Self {
            id,
            outcome: Outcome::Result(result),
        }
    }

    pub fn error(id: Id, error: RpcError) -> Self {
        Self {
            id,
            outcome: Outcome::Error(error),
        }
    }

    pub fn with_id(mut self, id: Id) -> Self {
        self.id = id;
        self
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Result(_))
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result(v) => Some(v),
            Outcome::Error(_) => None,
        }
    }

    pub fn error_object(&self) -> Option<&RpcError> {
        match &self.outcome {
            Outcome::Result(_) => None,
            Outcome::Error(e) => Some(e),
        }
    }

    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.outcome {
            Outcome::Result(v) => Ok(v),
            Outcome::Error(e) => Err(e),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), Value::String(JSONRPC_VERSION.into()));
        match &self.outcome {
            Outcome::Result(v) => {
                obj.insert("result".into(), v.clone());
            }
            Outcome::Error(e) => {
                obj.insert("error".into(), error_to_value(e));
            }
        }
        obj.insert("id".into(), self.id.to_value());
        Value::Object(obj)
    }

    /// Parse a reply element, requiring `jsonrpc: "2.0"`, an id, and exactly
    /// one of `result`/`error`.
    pub fn from_value(value: Value) -> Result<Self, MalformedResponse> {
        let Value::Object(mut obj) = value else {
            return Err(MalformedResponse("response must be a JSON object".into()));
        };

        match obj.get("jsonrpc") {
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            _ => return Err(MalformedResponse("jsonrpc must be \"2.0\"".into())),
        }

        let id = obj
            .get("id")
            .ok_or_else(|| MalformedResponse("missing id".into()))
            .and_then(|raw| {
                Id::from_value(raw)
                    .ok_or_else(|| MalformedResponse("id must be a string, a number or null".into()))
            })?;

        let outcome = match (obj.remove("result"), obj.remove("error")) {
            (Some(result), None) => Outcome::Result(result),
            (None, Some(error)) => Outcome::Error(
                serde_json::from_value(error)
                    .map_err(|e| MalformedResponse(format!("invalid error object: {e}")))?,
            ),
            (Some(_), Some(_)) => {
                return Err(MalformedResponse("both result and error present".into()));
            }
            (None, None) => {
                return Err(MalformedResponse("neither result nor error present".into()));
            }
        };

        Ok(Self { id, outcome })
    }
}

fn error_to_value(error: &RpcError) -> Value {
    let mut obj = Map::new();
    obj.insert("code".into(), Value::from(error.code));
    obj.insert("message".into(), Value::String(error.message.clone()));
    if let Some(data) = &error.data {
        obj.insert("data".into(), data.clone());
    }
    Value::Object(obj)
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Response {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}

/// Result from a handler.
pub type HandlerResult = Result<Value, crate::error::HandlerError>;
