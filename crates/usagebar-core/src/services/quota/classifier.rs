//! Failure classification
//!
//! A 401/403 from the usage endpoint is ambiguous: either the session
//! credential really expired, or an anti-bot layer intercepted the request
//! and answered with its verification page. Treating the latter as expiry
//! would suspend polling on a transient block, so auth failures are
//! disambiguated by sniffing the body for challenge-page markers.

use serde::Serialize;

use super::provider::{HttpResponse, QuotaError};

/// Case-sensitive substrings that identify a verification interstitial
pub const SOFT_BLOCK_MARKERS: [&str; 4] = [
    "Just a moment",
    "cf-browser-verification",
    "challenge-platform",
    "_cf_chl_opt",
];

/// Why an attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network error, timeout, non-auth HTTP error, or undecodable body
    Transient,
    /// Auth status carrying a challenge page; retried like `Transient`
    SoftBlocked,
    /// Auth status without a challenge page
    CredentialExpired,
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureKind::CredentialExpired)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::SoftBlocked => write!(f, "soft_blocked"),
            FailureKind::CredentialExpired => write!(f, "credential_expired"),
        }
    }
}

/// Result of inspecting one HTTP outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// HTTP 200; the body should be decoded
    Success,
    Failure(FailureKind),
}

/// Whether a body looks like an anti-bot verification page
pub fn is_soft_block_body(body: &str) -> bool {
    SOFT_BLOCK_MARKERS.iter().any(|marker| body.contains(marker))
}

/// Classify an HTTP outcome from its metadata
///
/// `transport_error` takes precedence: without a response there is nothing
/// else to inspect.
pub fn classify(
    status: Option<u16>,
    body: Option<&str>,
    transport_error: Option<&QuotaError>,
) -> Classification {
    if transport_error.is_some() {
        return Classification::Failure(FailureKind::Transient);
    }

    match status {
        Some(200) => Classification::Success,
        Some(401) | Some(403) => {
            if body.map(is_soft_block_body).unwrap_or(false) {
                Classification::Failure(FailureKind::SoftBlocked)
            } else {
                Classification::Failure(FailureKind::CredentialExpired)
            }
        }
        _ => Classification::Failure(FailureKind::Transient),
    }
}

/// Classify the outcome of a fetcher call
pub fn classify_outcome(outcome: &Result<HttpResponse, QuotaError>) -> Classification {
    match outcome {
        Ok(response) => classify(Some(response.status), Some(&response.body), None),
        Err(err) => classify(None, None, Some(err)),
    }
}

// ============================================================================
// Tests
// ============================================================================
