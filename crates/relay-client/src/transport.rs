//! Transport boundary for the caller.
//!
//! A transport moves one serialized message (a request, a notification, or
//! a batch) to a peer and hands back whatever text the peer answered with.

use std::future::Future;
use std::time::Duration;

/// Failure to move a message or to make sense of the answer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("peer sent no reply")]
    NoReply,

    #[error("reply did not answer this call")]
    MissingReply,

    #[error("malformed reply: {0}")]
    MalformedReply(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport failed: {0}")]
    Failed(String),
}

/// Trait implemented by anything that can carry JSON-RPC text to a peer.
pub trait Transport: Send + Sync + 'static {
    /// Send one message. `Ok(None)` means the peer answered with nothing,
    /// which is expected for notifications.
    fn send(
        &self,
        outgoing: String,
    ) -> impl Future<Output = Result<Option<String>, TransportError>> + Send;
}

/// A transport backed by a closure.
pub struct FnTransport<F> {
    send: F,
}

impl<F, Fut> Transport for FnTransport<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<String>, TransportError>> + Send,
{
    fn send(
        &self,
        outgoing: String,
    ) -> impl Future<Output = Result<Option<String>, TransportError>> + Send {
        (self.send)(outgoing)
    }
}

/// Build a transport from an async closure.
///
/// ```ignore
/// let transport = transport_fn(|text| async move { Ok(peer.handle(&text).await) });
/// ```
pub fn transport_fn<F, Fut>(send: F) -> FnTransport<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<String>, TransportError>> + Send,
{
    FnTransport { send }
}
