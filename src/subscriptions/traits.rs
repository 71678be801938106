// Subscription store trait: read-only lookup from the dispatcher's side.
//
// Implementors: SqliteStore (rusqlite, PushSubscription records) and
// MemoryStore (any Subscriber type). The dispatcher never writes;
// registration goes through the concrete store's own methods.

use anyhow::Result;
use async_trait::async_trait;

/// What the dispatcher needs to know about a subscription: whose it is.
/// Everything else about the record is opaque and passed to the notifier.
pub trait Subscriber: Send + Sync + 'static {
    fn did(&self) -> &str;
}

#[async_trait]
pub trait SubscriptionStore<S: Subscriber>: Send + Sync {
    /// Look up the subscription for a DID. `None` input, or a DID with
    /// nothing registered, yields `Ok(None)`. Implementations normalize
    /// the DID before lookup.
    async fn get(&self, did: Option<&str>) -> Result<Option<S>>;
}
