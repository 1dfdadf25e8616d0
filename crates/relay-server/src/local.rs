//! In-process transport: a caller talking straight to a dispatcher.

use std::sync::Arc;

use relay_client::{Caller, CallerConfig, Transport, TransportError};

use crate::dispatcher::Dispatcher;

/// Delivers outgoing text to a shared dispatcher without any I/O.
#[derive(Clone)]
pub struct LocalTransport {
    dispatcher: Arc<Dispatcher>,
}

impl LocalTransport {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl Transport for LocalTransport {
    async fn send(&self, outgoing: String) -> Result<Option<String>, TransportError> {
        Ok(self.dispatcher.handle_text(&outgoing).await)
    }
}

impl Dispatcher {
    /// A caller bound to this dispatcher through a `LocalTransport`.
    pub fn local_caller(self: &Arc<Self>) -> Caller<LocalTransport> {
        self.local_caller_with(CallerConfig::default())
    }

    pub fn local_caller_with(self: &Arc<Self>, config: CallerConfig) -> Caller<LocalTransport> {
        Caller::with_config(LocalTransport::new(Arc::clone(self)), config)
    }
}
