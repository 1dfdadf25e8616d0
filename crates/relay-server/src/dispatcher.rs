//! Dispatcher — turns JSON-RPC input into replies.
//!
//! Every single call walks the same path:
//! validate → resolve → `before_call` chain → bind params → invoke →
//! `after_call` chain on success, `on_error` chain on failure → reply
//! (requests) or discard (notifications).

use std::sync::Arc;

use relay_protocol::{Id, Metadata, Request, Response, RpcError};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::batch::{BatchCoordinator, BatchMode};
use crate::middleware::{Middleware, MiddlewareChain, Rejected};
use crate::registry::{HandlerDescriptor, MethodInfo, MethodRegistry, RegistryError, Service, ServiceMethods};

/// Default upper bound on batch length.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// How batch elements are scheduled
    pub batch_mode: BatchMode,
    /// Longest batch accepted; `None` for unbounded
    pub max_batch_size: Option<usize>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_mode: BatchMode::Concurrent,
            max_batch_size: Some(DEFAULT_MAX_BATCH_SIZE),
        }
    }
}

/// The dispatcher. Owns the method registry and the middleware chain.
///
/// Configure it through `&mut self`, then share it (usually behind an `Arc`)
/// and call `handle_*` concurrently.
#[derive(Default)]
pub struct Dispatcher {
    registry: MethodRegistry,
    middleware: MiddlewareChain,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DispatchConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    // ── Registration ───────────────────────────────────────────────────────

    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: HandlerDescriptor,
    ) -> Result<(), RegistryError> {
        self.registry.register(name, handler)
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.registry.unregister(name)
    }

    pub fn register_service<S: Service>(
        &mut self,
        namespace: &str,
        service: S,
    ) -> Result<usize, RegistryError> {
        self.registry.register_service(namespace, service)
    }

    pub fn register_methods(
        &mut self,
        namespace: &str,
        methods: ServiceMethods,
    ) -> Result<usize, RegistryError> {
        self.registry.register_methods(namespace, methods)
    }

    pub fn unregister_service(&mut self, namespace: &str) -> bool {
        self.registry.unregister_service(namespace)
    }

    pub fn list_methods(&self) -> Vec<MethodInfo> {
        self.registry.list_methods()
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    pub fn add_middleware<M: Middleware + 'static>(&mut self, middleware: M) {
        info!("Adding middleware: {}", middleware.name());
        self.middleware.add(middleware);
    }

    pub fn middleware_names(&self) -> Vec<&str> {
        self.middleware.names()
    }

    /// Wrap in an `Arc`, ready to be shared with transports.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    // ── Entry points ───────────────────────────────────────────────────────

    /// Handle raw JSON text. Returns the reply text, or `None` when nothing
    /// should be sent back.
    pub async fn handle_text(&self, text: &str) -> Option<String> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                debug!("Unparseable input: {e}");
                let reply = Response::error(Id::Null, RpcError::parse_error(e.to_string()));
                return Some(encode(&reply.to_value()));
            }
        };
        self.handle_value(value).await.map(|reply| encode(&reply))
    }

    /// Handle an already-parsed message or batch.
    pub async fn handle_value(&self, value: Value) -> Option<Value> {
        self.handle_value_with_meta(value, &Metadata::new()).await
    }

    /// Like `handle_value`, attaching transport-supplied metadata to every
    /// request in the message.
    pub async fn handle_value_with_meta(&self, value: Value, meta: &Metadata) -> Option<Value> {
        match value {
            Value::Array(items) => self.handle_batch(items, meta).await,
            message @ Value::Object(_) => self
                .dispatch_value(message, meta)
                .await
                .map(|reply| reply.to_value()),
            // Valid JSON of the wrong shape is an invalid request; -32700 is
            // reserved for text that does not parse.
            _ => {
                let err = RpcError::invalid_request("message must be an object or an array");
                Some(Response::error(Id::Null, err).to_value())
            }
        }
    }

    async fn handle_batch(&self, items: Vec<Value>, meta: &Metadata) -> Option<Value> {
        if items.is_empty() {
            let err = RpcError::invalid_request("empty batch");
            return Some(Response::error(Id::Null, err).to_value());
        }
        if let Some(max) = self.config.max_batch_size {
            if items.len() > max {
                warn!("Rejected batch of {} (limit {max})", items.len());
                let err = RpcError::invalid_request(format!(
                    "batch of {} exceeds the limit of {max}",
                    items.len()
                ));
                return Some(Response::error(Id::Null, err).to_value());
            }
        }

        let replies = BatchCoordinator::new(self, self.config.batch_mode)
            .run(items, meta)
            .await;

        if replies.is_empty() {
            None
        } else {
            Some(Value::Array(replies.iter().map(Response::to_value).collect()))
        }
    }

    /// Validate one message and dispatch it.
    pub(crate) async fn dispatch_value(&self, value: Value, meta: &Metadata) -> Option<Response> {
        let id = Id::recover(&value);
        match Request::from_value(value) {
            Ok(mut request) => {
                request
                    .meta
                    .extend(meta.iter().map(|(k, v)| (k.clone(), v.clone())));
                self.dispatch(request).await
            }
            Err(err) => {
                debug!("Invalid request: {err}");
                Some(Response::error(id, err))
            }
        }
    }

    /// Dispatch one validated request. Returns `None` for notifications.
    pub async fn dispatch(&self, request: Request) -> Option<Response> {
        let id = request.reply_id();
        let notification = request.is_notification();
        let method = request.method.clone();

        let entry = match self.registry.resolve(&method) {
            Ok(entry) => entry,
            Err(_) if notification => {
                debug!("Dropping notification for unknown method: {method}");
                return None;
            }
            Err(_) => {
                debug!("Method not found: {method} (id: {id})");
                return Some(Response::error(id, RpcError::method_not_found(&method)));
            }
        };

        let outcome = match self.middleware.run_before(request).await {
            Err(Rejected { request, error }) => Err((request, error)),
            Ok(request) => match entry.invoke(request.params.clone()).await {
                Ok(value) => Ok((request, value)),
                Err(error) => Err((request, error)),
            },
        };

        let response = match outcome {
            Ok((request, value)) => {
                let response = Response::success(id.clone(), value);
                self.middleware.run_after(&request, response).await
            }
            Err((request, error)) => {
                if notification {
                    warn!("Notification {method} failed: {error}");
                }
                match self.middleware.run_on_error(&request, &error).await {
                    Some(substitute) => substitute,
                    None => Response::error(id.clone(), error.into_rpc_error()),
                }
            }
        };

        if notification {
            None
        } else {
            Some(response.with_id(id))
        }
    }
}

/// Serialize a reply.
fn encode(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| {
        r#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"Internal error"},"id":null}"#.into()
    })
}
