//! Batch coordinator — runs the elements of a batch and collects replies.

use futures_util::future::join_all;
use relay_protocol::{Metadata, Response};
use serde_json::Value;
use tracing::debug;

use crate::dispatcher::Dispatcher;

/// How the elements of one batch are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchMode {
    /// All elements in flight at once; replies still come back in input
    /// order.
    #[default]
    Concurrent,
    /// One element at a time, in input order, for handlers whose side
    /// effects must not interleave.
    Sequential,
}

/// Dispatches the elements of one non-empty batch.
pub struct BatchCoordinator<'a> {
    dispatcher: &'a Dispatcher,
    mode: BatchMode,
}

impl<'a> BatchCoordinator<'a> {
    pub fn new(dispatcher: &'a Dispatcher, mode: BatchMode) -> Self {
        Self { dispatcher, mode }
    }

    /// Dispatch every element and return the replies of the ones that
    /// produced one, in input order. Notifications contribute nothing.
    pub async fn run(&self, items: Vec<Value>, meta: &Metadata) -> Vec<Response> {
        debug!("Dispatching batch of {} ({:?})", items.len(), self.mode);

        let replies: Vec<Option<Response>> = match self.mode {
            BatchMode::Concurrent => {
                join_all(
                    items
                        .into_iter()
                        .map(|item| self.dispatcher.dispatch_value(item, meta)),
                )
                .await
            }
            BatchMode::Sequential => {
                let mut replies = Vec::with_capacity(items.len());
                for item in items {
                    replies.push(self.dispatcher.dispatch_value(item, meta).await);
                }
                replies
            }
        };

        replies.into_iter().flatten().collect()
    }
}
