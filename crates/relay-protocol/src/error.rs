//! JSON-RPC 2.0 error objects and the standard error code table.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Standard JSON-RPC 2.0 error codes plus the server and application ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // JSON-RPC 2.0 standard errors
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,

    /// Implementation-defined server error, -32099..=-32000
    ServerError(i64),

    /// Any code outside the reserved ranges
    Application(i64),
}

/// Lower bound of the implementation-defined server error range.
pub const SERVER_ERROR_MIN: i64 = -32099;
/// Upper bound of the implementation-defined server error range.
pub const SERVER_ERROR_MAX: i64 = -32000;

impl ErrorCode {
    pub fn code(&self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ServerError(c) | Self::Application(c) => *c,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            c if (SERVER_ERROR_MIN..=SERVER_ERROR_MAX).contains(&c) => Self::ServerError(c),
            c => Self::Application(c),
        }
    }

    /// The interoperable default message for this code.
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ServerError(_) => "Server error",
            Self::Application(_) => "Application error",
        }
    }

    /// Whether the code falls inside the range reserved by JSON-RPC 2.0
    /// (-32768..=-32000).
    pub fn is_reserved(&self) -> bool {
        (-32768..=-32000).contains(&self.code())
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.default_message(), self.code())
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,
}

/// A `data` member that is present stays `Some`, even when it is `null`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl RpcError {
    /// An error with an explicit code and message.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// An error carrying the default message of `code`.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code.code(), code.default_message())
    }

    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::ParseError).with_data(detail.into())
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::InvalidRequest).with_data(detail.into())
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::from_code(ErrorCode::MethodNotFound).with_data(method)
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::InvalidParams).with_data(detail.into())
    }

    /// Internal error. The fault text only ever travels in `data`.
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::InternalError).with_data(detail.into())
    }

    /// Server-defined error in the -32099..=-32000 range.
    ///
    /// Codes outside that range are clamped to -32000.
    pub fn server_error(code: i64, message: impl Into<String>) -> Self {
        let code = if (SERVER_ERROR_MIN..=SERVER_ERROR_MAX).contains(&code) {
            code
        } else {
            SERVER_ERROR_MAX
        };
        Self::new(code, message)
    }

    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::from_code(self.code)
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error [{}]: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

/// Failure raised by a handler or a middleware hook.
///
/// `Rpc` errors already carry their wire representation and pass through
/// verbatim. `Fault` is anything else; it is reported as `-32603` with the
/// fault text confined to `data`.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Fault(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn fault(err: impl Into<anyhow::Error>) -> Self {
        Self::Fault(err.into())
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::Rpc(RpcError::invalid_params(detail))
    }

    /// Map to the error object that goes on the wire.
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::Rpc(err) => err.clone(),
            Self::Fault(fault) => RpcError::internal(format!("{fault:#}")),
        }
    }

    pub fn into_rpc_error(self) -> RpcError {
        match self {
            Self::Rpc(err) => err,
            fault @ Self::Fault(_) => fault.to_rpc_error(),
        }
    }
}

/// A reply that does not have the shape of a JSON-RPC 2.0 response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed response: {0}")]
pub struct MalformedResponse(pub String);
