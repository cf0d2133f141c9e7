//! claude.ai usage client
//!
//! Fetches the raw usage payload for an organization using the browser
//! session cookie. The client performs exactly one request per call and
//! hands back whatever status and body it got; classification, decoding
//! and retries happen in the engine.
//!
//! # Example
//!
//! ```ignore
//! use usagebar_core::config::{CredentialConfig, EnvFallback, resolve_credentials};
//! use usagebar_core::services::quota::{ClaudeWebClient, UsageFetcher};
//!
//! let client = ClaudeWebClient::new();
//! let credentials = resolve_credentials(&CredentialConfig::default(), &EnvFallback::from_process())?;
//! let response = client.fetch(&credentials).await?;
//! println!("HTTP {}: {} bytes", response.status, response.body.len());
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::config::Credentials;

use super::provider::{HttpResponse, QuotaError, UsageFetcher};

// ============================================================================
// Constants
// ============================================================================

/// Origin of the usage endpoint
pub const DEFAULT_BASE_URL: &str = "https://claude.ai";

/// Browser-like user agent; the endpoint sits behind an anti-bot layer
pub const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) ClaudeUsageWidget/1.0";

/// HTTP request timeout in seconds
pub const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Longest body prefix written to the log
const LOG_PREVIEW_BYTES: usize = 200;

// ============================================================================
// ClaudeWebClient
// ============================================================================

/// Usage fetcher for `GET {base}/api/organizations/{org}/usage`
pub struct ClaudeWebClient {
    client: Client,
    base_url: String,
}

impl ClaudeWebClient {
    /// Create a client against claude.ai with the default timeout
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Create a client against another origin (mock servers, proxies)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Endpoint for an organization
    pub fn usage_url(&self, organization_id: &str) -> String {
        format!(
            "{}/api/organizations/{}/usage",
            self.base_url, organization_id
        )
    }
}

impl Default for ClaudeWebClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageFetcher for ClaudeWebClient {
    fn fetcher_id(&self) -> &'static str {
        "claude_web"
    }

    async fn fetch(&self, credentials: &Credentials) -> Result<HttpResponse, QuotaError> {
        let url = self.usage_url(&credentials.organization_id);
        log::debug!("[quota:client] GET {}", url);

        let response = self
            .client
            .get(&url)
            .header("Cookie", format!("sessionKey={}", credentials.session_key))
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| {
                log::warn!("[quota:client] Request failed: {}", e);
                QuotaError::from(e)
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            log::warn!("[quota:client] Failed to read body (HTTP {}): {}", status, e);
            QuotaError::from(e)
        })?;

        log::debug!(
            "[quota:client] HTTP {} ({} bytes): {}",
            status,
            body.len(),
            preview(&body)
        );

        Ok(HttpResponse { status, body })
    }
}

/// First [`LOG_PREVIEW_BYTES`] of a body, cut on a char boundary
pub fn preview(body: &str) -> &str {
    if body.len() <= LOG_PREVIEW_BYTES {
        return body;
    }
    let mut end = LOG_PREVIEW_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

// ============================================================================
// Tests
// ============================================================================
