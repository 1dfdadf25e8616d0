//! Relay RPC - Protocol Types
//!
//! JSON-RPC 2.0 message model shared by the server-side dispatcher and the
//! client-side caller: requests, notifications, responses, error objects
//! and the standard error code table.

pub mod error;
pub mod jsonrpc;

pub use error::{ErrorCode, HandlerError, MalformedResponse, RpcError};
pub use jsonrpc::{
    HandlerResult, Id, JSONRPC_VERSION, Metadata, Notification, Outcome, Params, Request,
    Response,
};
