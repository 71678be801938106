// Dry-run notifier: logs each notification instead of delivering it.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use super::message::NotificationMessage;
use super::traits::PushNotifier;
use crate::subscriptions::Subscriber;

pub struct LogNotifier;

#[async_trait]
impl<S: Subscriber> PushNotifier<S> for LogNotifier {
    async fn send(&self, subscription: &S, message: &NotificationMessage) -> Result<()> {
        info!(
            to = %subscription.did(),
            reason = %message.data.reason,
            actor = %message.data.actor_did,
            title = %message.title,
            body = %message.body,
            "Would send notification"
        );
        Ok(())
    }
}
