// HTTP push gateway notifier.
//
// Posts one JSON message per notification in the Expo push format:
//   { "to": <push token>, "title", "body", "data", "sound": "default" }
// and reads back a single push ticket. Transport failures, 429 and 5xx
// answers are retried with backoff; anything else fails immediately.
//
// API docs: https://docs.expo.dev/push-notifications/sending-notifications/

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::message::{NotificationData, NotificationMessage};
use super::traits::PushNotifier;
use crate::retry::{with_retry, Backoff};
use crate::subscriptions::PushSubscription;

/// Default push gateway endpoint.
pub const DEFAULT_PUSH_GATEWAY_URL: &str = "https://exp.host/--/api/v2/push/send";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Non-success HTTP answer from the gateway.
#[derive(Debug)]
pub struct GatewayError {
    pub status: u16,
    pub body: String,
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "push gateway returned {}: {}", self.status, self.body)
    }
}

impl std::error::Error for GatewayError {}

/// Whether a failed send is worth retrying.
pub fn is_transient(err: &anyhow::Error) -> bool {
    if let Some(gateway) = err.downcast_ref::<GatewayError>() {
        return gateway.status == 429 || gateway.status >= 500;
    }
    if let Some(http) = err.downcast_ref::<reqwest::Error>() {
        return http.is_timeout() || http.is_connect();
    }
    false
}

pub struct GatewayNotifier {
    client: Client,
    url: String,
    access_token: Option<String>,
}

impl GatewayNotifier {
    pub fn new(url: &str, access_token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent("firebell/0.1 (push-dispatcher)")
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: url.to_string(),
            access_token: access_token.filter(|t| !t.is_empty()),
        })
    }

    async fn post_once(&self, request: &PushRequest<'_>) -> Result<()> {
        let mut builder = self.client.post(&self.url).json(request);
        if let Some(token) = &self.access_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .context("Push gateway request failed")?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError { status, body }.into());
        }

        let ticket: PushResponse = response
            .json()
            .await
            .context("Failed to parse push gateway response")?;

        ticket.data.into_result()
    }
}

#[async_trait]
impl PushNotifier<PushSubscription> for GatewayNotifier {
    async fn send(
        &self,
        subscription: &PushSubscription,
        message: &NotificationMessage,
    ) -> Result<()> {
        let request = PushRequest::new(&subscription.push_token, message);

        with_retry(Backoff::DELIVERY, is_transient, || self.post_once(&request))
            .await
            .with_context(|| format!("Delivery to {} failed", subscription.did))?;

        debug!(
            did = %subscription.did,
            reason = %message.data.reason,
            "Push accepted by gateway"
        );
        Ok(())
    }
}

// --- Push gateway request/response types ---

#[derive(Debug, Serialize)]
pub struct PushRequest<'a> {
    to: &'a str,
    title: &'a str,
    body: &'a str,
    data: &'a NotificationData,
    sound: &'static str,
}

impl<'a> PushRequest<'a> {
    pub fn new(push_token: &'a str, message: &'a NotificationMessage) -> Self {
        Self {
            to: push_token,
            title: &message.title,
            body: &message.body,
            data: &message.data,
            sound: "default",
        }
    }
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    data: PushTicket,
}

#[derive(Debug, Deserialize)]
struct PushTicket {
    status: String,
    message: Option<String>,
    details: Option<serde_json::Value>,
}

impl PushTicket {
    fn into_result(self) -> Result<()> {
        if self.status == "ok" {
            return Ok(());
        }
        let reason = self
            .details
            .as_ref()
            .and_then(|d| d.get("error"))
            .and_then(|e| e.as_str())
            .unwrap_or("unknown");
        anyhow::bail!(
            "Push ticket rejected ({reason}): {}",
            self.message.unwrap_or_default()
        )
    }
}
