// Push notifier trait: the delivery sink.
//
// Implementors: GatewayNotifier (HTTP push gateway), LogNotifier (dry run).
// Retries, timeouts and failure reporting are the notifier's business;
// the dispatcher calls `send` once per notification and only logs errors.

use anyhow::Result;
use async_trait::async_trait;

use super::message::NotificationMessage;

#[async_trait]
pub trait PushNotifier<S>: Send + Sync {
    /// Deliver one notification to one subscription.
    async fn send(&self, subscription: &S, message: &NotificationMessage) -> Result<()>;
}
