use std::sync::Arc;

use async_trait::async_trait;

use super::Item;
use crate::dispatch::{DispatchError, DispatchReceipt, DispatchRequest, Dispatcher};
use crate::metrics::MetricsCollector;

/// What a [`DecisionHandler`] gets to work with for one item.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub stream_name: String,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Arc<MetricsCollector>,
}

impl HandlerContext {
    /// Send a message through the shared, rate-limited dispatcher.
    pub async fn send(&self, request: DispatchRequest) -> Result<DispatchReceipt, DispatchError> {
        self.dispatcher.send(request).await
    }

    /// Count a firing of the named rule.
    pub fn record_rule(&self, rule: &str) {
        self.metrics.record_rule_triggered(rule);
    }
}

/// Decides what to do with each new item.
///
/// Errors and panics are caught by the worker and recorded; the item is
/// marked seen either way and never retried.
#[async_trait]
pub trait DecisionHandler: Send + Sync {
    async fn handle(&self, item: &Item, ctx: &HandlerContext) -> anyhow::Result<()>;
}
