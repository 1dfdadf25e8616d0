//! Caller — issues calls, notifications and batches over a transport and
//! correlates replies by id.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use relay_protocol::{Id, Notification, Params, Request, Response, RpcError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tracing::{debug, warn};

use crate::transport::{Transport, TransportError};

/// Why a call did not produce a result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    /// The peer answered with an error object.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("call cancelled")]
    Cancelled,

    #[error("could not decode result: {0}")]
    Decode(String),
}

impl ClientError {
    /// The error object, when the peer sent one.
    pub fn rpc(&self) -> Option<&RpcError> {
        match self {
            Self::Rpc(err) => Some(err),
            _ => None,
        }
    }
}

/// How request ids are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdStrategy {
    /// Monotonic integers starting at 1
    #[default]
    Counter,
    /// Random v4 UUID strings
    Uuid,
}

/// Caller configuration.
#[derive(Debug, Clone, Default)]
pub struct CallerConfig {
    pub id_strategy: IdStrategy,
    /// Upper bound on one round trip; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

/// One entry of an outgoing batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchCall {
    method: String,
    params: Option<Params>,
    notification: bool,
}

impl BatchCall {
    pub fn call(method: impl Into<String>, params: Option<Params>) -> Self {
        Self {
            method: method.into(),
            params,
            notification: false,
        }
    }

    pub fn notify(method: impl Into<String>, params: Option<Params>) -> Self {
        Self {
            method: method.into(),
            params,
            notification: true,
        }
    }
}

/// Per-entry outcome of a batch, in submission order.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// A notification; there is nothing to wait for.
    Notified,
    Settled(Result<Value, ClientError>),
}

impl BatchOutcome {
    pub fn into_result(self) -> Option<Result<Value, ClientError>> {
        match self {
            Self::Notified => None,
            Self::Settled(result) => Some(result),
        }
    }
}

type Waiter = oneshot::Sender<Result<Value, ClientError>>;

/// Removes waiters that are still registered when a call is abandoned.
struct PendingGuard<'a> {
    pending: &'a DashMap<Id, Waiter>,
    ids: Vec<Id>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        for id in &self.ids {
            self.pending.remove(id);
        }
    }
}

/// JSON-RPC client over any `Transport`.
///
/// Ids are unique among pending calls; replies are matched by id, never by
/// arrival order.
pub struct Caller<T> {
    transport: T,
    config: CallerConfig,
    next_id: AtomicU64,
    pending: DashMap<Id, Waiter>,
}

impl<T: Transport> Caller<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, CallerConfig::default())
    }

    pub fn with_config(transport: T, config: CallerConfig) -> Self {
        Self {
            transport,
            config,
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &CallerConfig {
        &self.config
    }

    /// Call a method and wait for its result.
    pub async fn call(&self, method: &str, params: Option<Params>) -> Result<Value, ClientError> {
        self.call_with_timeout(method, params, self.config.timeout).await
    }

    /// Call a method and deserialize its result.
    pub async fn call_as<R: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Params>,
    ) -> Result<R, ClientError> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Call with an explicit round-trip limit, overriding the configured one.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Option<Params>,
        timeout: Option<Duration>,
    ) -> Result<Value, ClientError> {
        let (id, rx) = self.register();
        let _guard = PendingGuard {
            pending: &self.pending,
            ids: vec![id.clone()],
        };

        debug!("Calling {method} (id: {id})");
        let payload = Request::new(method, params, id.clone()).to_value().to_string();
        let ids = [id];
        let settled = settle(rx, self.exchange(payload, &ids));

        match timeout {
            Some(limit) => tokio::time::timeout(limit, settled)
                .await
                .unwrap_or(Err(TransportError::Timeout(limit).into())),
            None => settled.await,
        }
    }

    /// Send a notification. Never waits for a correlated reply.
    pub async fn notify(&self, method: &str, params: Option<Params>) -> Result<(), ClientError> {
        debug!("Notifying {method}");
        let payload = Notification::new(method, params).to_value().to_string();
        let send = self.transport.send(payload);

        let sent = match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .map_err(|_| TransportError::Timeout(limit))?,
            None => send.await,
        };
        if let Some(reply) = sent? {
            debug!("Ignoring reply to notification {method}: {reply}");
        }
        Ok(())
    }

    /// Send several calls and notifications as one batch.
    ///
    /// Outcomes come back in submission order regardless of the order the
    /// peer answered in. An empty batch is never sent.
    pub async fn batch(&self, calls: Vec<BatchCall>) -> Vec<BatchOutcome> {
        if calls.is_empty() {
            return Vec::new();
        }

        let mut messages = Vec::with_capacity(calls.len());
        let mut waiters = Vec::with_capacity(calls.len());
        let mut ids = Vec::new();
        for call in calls {
            if call.notification {
                messages.push(Notification::new(call.method, call.params).to_value());
                waiters.push(None);
            } else {
                let (id, rx) = self.register();
                messages.push(Request::new(call.method, call.params, id.clone()).to_value());
                ids.push(id);
                waiters.push(Some(rx));
            }
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            ids: ids.clone(),
        };

        debug!("Sending batch of {} ({} calls)", messages.len(), ids.len());
        let exchange = self.exchange(Value::Array(messages).to_string(), &ids);
        let timed_out = match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .is_err()
                .then_some(limit),
            None => {
                exchange.await;
                None
            }
        };

        waiters
            .into_iter()
            .map(|waiter| match waiter {
                None => BatchOutcome::Notified,
                Some(mut rx) => BatchOutcome::Settled(match rx.try_recv() {
                    Ok(settled) => settled,
                    Err(TryRecvError::Empty) => match timed_out {
                        Some(limit) => Err(TransportError::Timeout(limit).into()),
                        None => Err(ClientError::Cancelled),
                    },
                    Err(TryRecvError::Closed) => Err(ClientError::Cancelled),
                }),
            })
            .collect()
    }

    /// Abandon a pending call. Its caller sees `ClientError::Cancelled`;
    /// a late reply for the id is discarded.
    pub fn cancel(&self, id: &Id) -> bool {
        match self.pending.remove(id) {
            Some((_, waiter)) => {
                debug!("Cancelled call {id}");
                let _ = waiter.send(Err(ClientError::Cancelled));
                true
            }
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_ids(&self) -> Vec<Id> {
        self.pending.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Route reply text to the waiting calls.
    ///
    /// Returns the error object of the first reply keyed to `null`, which
    /// cannot be matched to any call. Replies for unknown ids are discarded.
    pub fn deliver(&self, reply: &str) -> Result<Option<RpcError>, TransportError> {
        let value: Value = serde_json::from_str(reply)
            .map_err(|e| TransportError::MalformedReply(e.to_string()))?;

        let items = match value {
            Value::Array(items) => items,
            single @ Value::Object(_) => vec![single],
            other => {
                return Err(TransportError::MalformedReply(format!(
                    "expected object or array, got {other}"
                )));
            }
        };

        let responses = items
            .into_iter()
            .map(Response::from_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TransportError::MalformedReply(e.0))?;

        let mut orphan = None;
        for response in responses {
            if response.id.is_null() {
                if let Some(err) = response.error_object() {
                    warn!("Uncorrelated error reply: {err}");
                    orphan.get_or_insert_with(|| err.clone());
                }
                continue;
            }
            match self.pending.remove(&response.id) {
                Some((_, waiter)) => {
                    let _ = waiter.send(response.into_result().map_err(ClientError::Rpc));
                }
                None => debug!("Discarding reply for unknown id: {}", response.id),
            }
        }
        Ok(orphan)
    }

    fn next_candidate(&self) -> Id {
        match self.config.id_strategy {
            IdStrategy::Counter => Id::from(self.next_id.fetch_add(1, Ordering::Relaxed)),
            IdStrategy::Uuid => Id::String(uuid::Uuid::new_v4().to_string()),
        }
    }

    /// Allocate an id no pending call is using and park a waiter on it.
    fn register(&self) -> (Id, oneshot::Receiver<Result<Value, ClientError>>) {
        let (tx, rx) = oneshot::channel();
        loop {
            let id = self.next_candidate();
            if let Entry::Vacant(slot) = self.pending.entry(id.clone()) {
                slot.insert(tx);
                return (id, rx);
            }
        }
    }

    /// One round trip. Every id in `ids` is settled when this returns:
    /// by its own reply, or by the failure that explains why it has none.
    async fn exchange(&self, payload: String, ids: &[Id]) {
        let fallback = match self.transport.send(payload).await {
            Ok(Some(reply)) => match self.deliver(&reply) {
                Ok(Some(orphan)) => ClientError::Rpc(orphan),
                Ok(None) => TransportError::MissingReply.into(),
                Err(e) => {
                    warn!("{e}");
                    e.into()
                }
            },
            Ok(None) => TransportError::NoReply.into(),
            Err(e) => {
                warn!("Transport failed: {e}");
                e.into()
            }
        };

        for id in ids {
            if let Some((_, waiter)) = self.pending.remove(id) {
                let _ = waiter.send(Err(fallback.clone()));
            }
        }
    }
}

/// Wait for a waiter while driving its round trip. A cancellation settles
/// the waiter without waiting for the transport.
async fn settle(
    mut rx: oneshot::Receiver<Result<Value, ClientError>>,
    exchange: impl Future<Output = ()>,
) -> Result<Value, ClientError> {
    tokio::pin!(exchange);
    tokio::select! {
        biased;
        settled = &mut rx => return settled.unwrap_or(Err(ClientError::Cancelled)),
        () = &mut exchange => {}
    }
    rx.await.unwrap_or(Err(ClientError::Cancelled))
}
