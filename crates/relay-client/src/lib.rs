//! Relay Client
//!
//! Issues JSON-RPC 2.0 calls, notifications and batches over a pluggable
//! transport. The client is decoupled from how bytes move via the
//! `Transport` trait; replies are correlated to calls by id.

pub mod client;
pub mod transport;

pub use client::{BatchCall, BatchOutcome, Caller, CallerConfig, ClientError, IdStrategy};
pub use transport::{FnTransport, Transport, TransportError, transport_fn};
