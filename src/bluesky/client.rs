// Public AT Protocol client: unauthenticated XRPC over HTTP.
//
// Only read endpoints are used (profile lookup for display names), and
// those are public, so no session is needed.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

/// Default public API endpoint for AT Protocol read operations.
pub const DEFAULT_PUBLIC_API_URL: &str = "https://public.api.bsky.app";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Thin reqwest wrapper with a generic XRPC GET helper.
pub struct PublicAtpClient {
    client: reqwest::Client,
    base_url: String,
}

impl PublicAtpClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("firebell/0.1 (push-dispatcher)")
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// GET an XRPC endpoint and deserialize the response.
    ///
    /// `nsid` is the XRPC method name (e.g. "app.bsky.actor.getProfile").
    pub async fn xrpc_get<T: DeserializeOwned>(
        &self,
        nsid: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let url = format!("{}/xrpc/{}", self.base_url, nsid);

        debug!(nsid = nsid, "XRPC GET request");

        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .with_context(|| format!("XRPC request failed: {nsid}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("XRPC {nsid} returned {status}: {body}");
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to deserialize {nsid} response"))
    }

    /// Fetch the basic profile for a DID.
    pub async fn get_profile(&self, did: &str) -> Result<ProfileBasic> {
        self.xrpc_get("app.bsky.actor.getProfile", &[("actor", did)])
            .await
    }
}

/// The subset of `app.bsky.actor.defs#profileViewDetailed` we read.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileBasic {
    pub did: String,
    pub handle: String,
    pub display_name: Option<String>,
}

impl ProfileBasic {
    /// Label for notification text: `@handle`, unless the handle is the
    /// "handle.invalid" placeholder.
    pub fn label(&self) -> Option<String> {
        if self.handle.is_empty() || self.handle == "handle.invalid" {
            return None;
        }
        Some(format!("@{}", self.handle))
    }
}
