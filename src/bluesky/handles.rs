// Actor label resolution: DID → "@handle" for notification text.
//
// Runs inside delivery tasks, never on the event path. Results (including
// misses) are cached so a busy actor costs one lookup. Lookup failures
// fall back to the raw DID and are not cached, so a transient outage
// doesn't pin DIDs into notification text.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::client::{ProfileBasic, PublicAtpClient};
use crate::identity::normalize_did;

/// Upper bound on cached labels before the cache is flushed.
const MAX_CACHED: usize = 50_000;

/// Turns an actor DID into display text.
#[async_trait]
pub trait ActorLabeler: Send + Sync {
    /// Label for `did`, or `None` to fall back to the DID itself.
    async fn label(&self, did: &str) -> Option<String>;
}

/// Where profiles come from. `PublicAtpClient` in production.
#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn get_profile(&self, did: &str) -> Result<ProfileBasic>;
}

#[async_trait]
impl ProfileLookup for PublicAtpClient {
    async fn get_profile(&self, did: &str) -> Result<ProfileBasic> {
        PublicAtpClient::get_profile(self, did).await
    }
}

pub struct HandleResolver {
    profiles: Arc<dyn ProfileLookup>,
    cache: RwLock<HashMap<String, Option<String>>>,
}

impl HandleResolver {
    pub fn new(client: PublicAtpClient) -> Self {
        Self::with_lookup(Arc::new(client))
    }

    pub fn with_lookup(profiles: Arc<dyn ProfileLookup>) -> Self {
        Self {
            profiles,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ActorLabeler for HandleResolver {
    async fn label(&self, did: &str) -> Option<String> {
        let key = normalize_did(did);
        if let Some(hit) = self.cache.read().await.get(&key) {
            return hit.clone();
        }

        let label = match self.profiles.get_profile(did).await {
            Ok(profile) => profile.label(),
            Err(e) => {
                debug!(did = %did, error = %e, "Profile lookup failed, using DID");
                return None;
            }
        };

        let mut cache = self.cache.write().await;
        if cache.len() >= MAX_CACHED {
            cache.clear();
        }
        cache.insert(key, label.clone());
        label
    }
}
