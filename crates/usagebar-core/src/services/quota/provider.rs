//! Usage fetcher trait and error types
//!
//! Defines the boundary between the polling engine and the network. A
//! fetcher performs exactly one request and reports what came back; it
//! does not interpret status codes, retry, or decode. Those decisions
//! belong to the classifier and the engine.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::Credentials;

use super::classifier::FailureKind;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can end a fetch attempt or a fetch cycle
///
/// None of these propagate out of the engine; they are recorded, logged and
/// published as events.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuotaError {
    /// Session key or organization ID is not configured
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// No usable response: connection failure or a non-auth HTTP error
    #[error("Network error: {0}")]
    Transient(String),

    /// The request did not finish within the attempt timeout
    #[error("Request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// An anti-bot interstitial answered with an auth status
    #[error("Blocked by verification challenge (HTTP {0})")]
    SoftBlocked(u16),

    /// The API rejected the session credential
    #[error("Session expired (HTTP {0})")]
    CredentialExpired(u16),

    /// The response body was not a valid usage payload
    #[error("Decode error: {0}")]
    Decode(String),
}

impl QuotaError {
    /// Whether another attempt in the same cycle could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            QuotaError::Transient(_)
            | QuotaError::Timeout(_)
            | QuotaError::SoftBlocked(_)
            | QuotaError::Decode(_) => true,
            QuotaError::MissingCredentials(_) | QuotaError::CredentialExpired(_) => false,
        }
    }

    /// Classified failure kind, if this error came from a fetch attempt
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            QuotaError::Transient(_) | QuotaError::Timeout(_) | QuotaError::Decode(_) => {
                Some(FailureKind::Transient)
            }
            QuotaError::SoftBlocked(_) => Some(FailureKind::SoftBlocked),
            QuotaError::CredentialExpired(_) => Some(FailureKind::CredentialExpired),
            QuotaError::MissingCredentials(_) => None,
        }
    }
}

impl From<reqwest::Error> for QuotaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            QuotaError::Transient("Request timed out".to_string())
        } else if err.is_connect() {
            QuotaError::Transient("Connection failed".to_string())
        } else {
            QuotaError::Transient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for QuotaError {
    fn from(err: serde_json::Error) -> Self {
        QuotaError::Decode(err.to_string())
    }
}

// ============================================================================
// Fetcher Trait
// ============================================================================

/// Raw HTTP outcome of one attempt
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// A single request against the usage endpoint
///
/// Implementations return `Err` only for transport-level failures (no
/// response received). Any HTTP status, including 4xx/5xx, is an `Ok`.
///
/// # Example Implementation
///
/// ```ignore
/// use async_trait::async_trait;
/// use usagebar_core::config::Credentials;
/// use usagebar_core::services::quota::{HttpResponse, QuotaError, UsageFetcher};
///
/// struct Canned;
///
/// #[async_trait]
/// impl UsageFetcher for Canned {
///     fn fetcher_id(&self) -> &'static str {
///         "canned"
///     }
///
///     async fn fetch(&self, _credentials: &Credentials) -> Result<HttpResponse, QuotaError> {
///         Ok(HttpResponse::new(200, r#"{"five_hour": {"utilization": 12.0}}"#))
///     }
/// }
/// ```
#[async_trait]
pub trait UsageFetcher: Send + Sync {
    /// Short identifier used in log lines
    fn fetcher_id(&self) -> &'static str;

    /// Perform one request with the given credentials
    async fn fetch(&self, credentials: &Credentials) -> Result<HttpResponse, QuotaError>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_error_from_serde() {
        let json_err = serde_json::from_str::<serde_json::Value>("<html>").unwrap_err();
        let quota_err: QuotaError = json_err.into();
        assert!(matches!(quota_err, QuotaError::Decode(_)));
        assert!(quota_err.is_retryable());
    }

    #[test]
    fn test_quota_error_display() {
        assert_eq!(
            QuotaError::MissingCredentials("No session key configured".to_string()).to_string(),
            "Missing credentials: No session key configured"
        );
        assert_eq!(
            QuotaError::CredentialExpired(401).to_string(),
            "Session expired (HTTP 401)"
        );
        assert_eq!(
            QuotaError::Timeout(Duration::from_secs(15)).to_string(),
            "Request timed out after 15s"
        );
    }

    #[test]
    fn test_retry_policy() {
        assert!(QuotaError::Transient("HTTP 500".to_string()).is_retryable());
        assert!(QuotaError::SoftBlocked(403).is_retryable());
        assert!(!QuotaError::CredentialExpired(401).is_retryable());
        assert!(!QuotaError::MissingCredentials("x".to_string()).is_retryable());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            QuotaError::Decode("eof".to_string()).kind(),
            Some(FailureKind::Transient)
        );
        assert_eq!(QuotaError::SoftBlocked(403).kind(), Some(FailureKind::SoftBlocked));
        assert_eq!(QuotaError::MissingCredentials("x".to_string()).kind(), None);
    }
}
