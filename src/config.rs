use std::env;

use anyhow::Result;

use crate::bluesky::client::DEFAULT_PUBLIC_API_URL;
use crate::events::jetstream::DEFAULT_JETSTREAM_URL;
use crate::notify::gateway::DEFAULT_PUSH_GATEWAY_URL;

/// Central configuration loaded from environment variables.
///
/// Secrets come from env vars only. The .env file is loaded at startup
/// via dotenvy.
#[derive(Debug, Clone)]
pub struct Config {
    /// Jetstream subscribe endpoint (wss://.../subscribe).
    pub jetstream_url: String,
    /// Push gateway endpoint that accepts one message per POST.
    pub push_gateway_url: String,
    /// Optional bearer token for the push gateway.
    pub push_gateway_token: Option<String>,
    pub db_path: String,
    /// Save the Jetstream cursor and resume from it after restarts.
    pub persist_cursor: bool,
    /// Show `@handle` instead of the DID in notification text.
    pub resolve_handles: bool,
    /// Public AT Protocol API, used only for handle resolution.
    pub public_api_url: String,
}

impl Config {
    /// Load configuration from environment variables. Everything has a default.
    pub fn load() -> Result<Self> {
        Ok(Self {
            jetstream_url: env::var("JETSTREAM_URL")
                .unwrap_or_else(|_| DEFAULT_JETSTREAM_URL.to_string()),
            push_gateway_url: env::var("PUSH_GATEWAY_URL")
                .unwrap_or_else(|_| DEFAULT_PUSH_GATEWAY_URL.to_string()),
            push_gateway_token: env::var("PUSH_GATEWAY_TOKEN").ok().filter(|t| !t.is_empty()),
            db_path: env::var("FIREBELL_DB_PATH").unwrap_or_else(|_| "./firebell.db".to_string()),
            persist_cursor: parse_flag(env::var("FIREBELL_PERSIST_CURSOR").ok().as_deref(), true),
            resolve_handles: parse_flag(
                env::var("FIREBELL_RESOLVE_HANDLES").ok().as_deref(),
                false,
            ),
            public_api_url: env::var("PUBLIC_API_URL")
                .unwrap_or_else(|_| DEFAULT_PUBLIC_API_URL.to_string()),
        })
    }

    /// Check the Jetstream endpoint before connecting.
    pub fn require_jetstream(&self) -> Result<()> {
        if !(self.jetstream_url.starts_with("wss://") || self.jetstream_url.starts_with("ws://")) {
            anyhow::bail!(
                "JETSTREAM_URL must be a ws:// or wss:// URL, got: {}\n\
                 See .env.example for the expected format.",
                self.jetstream_url
            );
        }
        Ok(())
    }

    /// Check the push gateway endpoint before delivering for real.
    pub fn require_gateway(&self) -> Result<()> {
        if !(self.push_gateway_url.starts_with("https://")
            || self.push_gateway_url.starts_with("http://"))
        {
            anyhow::bail!(
                "PUSH_GATEWAY_URL must be an http(s) URL, got: {}\n\
                 Or pass --dry-run to log notifications instead.",
                self.push_gateway_url
            );
        }
        Ok(())
    }
}

/// Interpret a boolean-ish env value; unset or unrecognized uses `default`.
fn parse_flag(value: Option<&str>, default: bool) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}
