// Data models for the SQLite-backed store.

use serde::{Deserialize, Serialize};

use super::traits::Subscriber;

/// A device registered to receive push notifications for one actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushSubscription {
    /// Normalized DID of the actor who wants notifications.
    pub did: String,
    /// Opaque token the push gateway routes on.
    pub push_token: String,
    /// Client platform, informational ("ios", "android", "web", "expo").
    pub platform: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Subscriber for PushSubscription {
    fn did(&self) -> &str {
        &self.did
    }
}
