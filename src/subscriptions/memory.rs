// In-memory subscription store, keyed by normalized DID.
//
// Works with any Subscriber type. Handy for tests and for embedding the
// dispatcher behind a registration system that keeps its own state.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::traits::{Subscriber, SubscriptionStore};
use crate::identity::normalize_did;

pub struct MemoryStore<S> {
    entries: RwLock<HashMap<String, S>>,
}

impl<S> Default for MemoryStore<S> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<S: Subscriber + Clone> MemoryStore<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the subscription for `subscription.did()`.
    pub async fn insert(&self, subscription: S) {
        let key = normalize_did(subscription.did());
        self.entries.write().await.insert(key, subscription);
    }

    pub async fn remove(&self, did: &str) -> Option<S> {
        self.entries.write().await.remove(&normalize_did(did))
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl<S: Subscriber + Clone> SubscriptionStore<S> for MemoryStore<S> {
    async fn get(&self, did: Option<&str>) -> Result<Option<S>> {
        let Some(did) = did else {
            return Ok(None);
        };
        Ok(self.entries.read().await.get(&normalize_did(did)).cloned())
    }
}
