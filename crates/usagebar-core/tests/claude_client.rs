//! HTTP client tests against a local mock server

use std::time::Duration;

use usagebar_core::config::{CredentialConfig, Credentials, EnvFallback};
use usagebar_core::services::quota::classifier::{classify_outcome, Classification, FailureKind};
use usagebar_core::services::quota::claude::USER_AGENT;
use usagebar_core::services::quota::{
    ClaudeWebClient, DisplayConfig, PollingEngine, QuotaError, QuotaMetric, UsageFetcher,
    WidgetPhase,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const USAGE_PATH: &str = "/api/organizations/org-1/usage";

fn credentials() -> Credentials {
    Credentials {
        session_key: "sk-ant-test".to_string(),
        organization_id: "org-1".to_string(),
    }
}

fn usage_body() -> serde_json::Value {
    serde_json::json!({
        "five_hour": { "utilization": 42.0, "resets_at": "2099-01-01T00:00:00+00:00" },
        "seven_day": { "utilization": 12.4, "resets_at": null },
        "seven_day_opus": null,
        "extra_usage": { "is_enabled": false }
    })
}

#[tokio::test]
async fn test_fetch_sends_session_cookie_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(USAGE_PATH))
        .and(header("Cookie", "sessionKey=sk-ant-test"))
        .and(header("Accept", "application/json"))
        .and(header("User-Agent", USER_AGENT))
        .respond_with(ResponseTemplate::new(200).set_body_json(usage_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client = ClaudeWebClient::with_base_url(server.uri());
    let response = client.fetch(&credentials()).await.unwrap();

    assert_eq!(response.status, 200);
    assert!(response.body.contains("five_hour"));
    assert_eq!(classify_outcome(&Ok(response)), Classification::Success);
}

#[tokio::test]
async fn test_fetch_returns_error_statuses_as_responses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(USAGE_PATH))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_string("<html><title>Just a moment...</title></html>"),
        )
        .mount(&server)
        .await;

    let client = ClaudeWebClient::with_base_url(server.uri());
    let outcome = client.fetch(&credentials()).await;

    let response = outcome.as_ref().unwrap();
    assert_eq!(response.status, 403);
    assert_eq!(
        classify_outcome(&outcome),
        Classification::Failure(FailureKind::SoftBlocked)
    );
}

#[tokio::test]
async fn test_fetch_plain_401_is_credential_expired() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(USAGE_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "type": "error",
            "error": { "type": "authentication_error", "message": "Invalid session" }
        })))
        .mount(&server)
        .await;

    let client = ClaudeWebClient::with_base_url(server.uri());
    let outcome = client.fetch(&credentials()).await;
    assert_eq!(
        classify_outcome(&outcome),
        Classification::Failure(FailureKind::CredentialExpired)
    );
}

#[tokio::test]
async fn test_fetch_connection_refused_is_transient() {
    // Nothing listens on the discard port
    let client = ClaudeWebClient::with_base_url("http://127.0.0.1:9");
    let err = client.fetch(&credentials()).await.unwrap_err();
    assert!(matches!(err, QuotaError::Transient(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_fetch_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(usage_body())
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let client = ClaudeWebClient::with_timeout(server.uri(), Duration::from_millis(200));
    let err = client.fetch(&credentials()).await.unwrap_err();
    assert_eq!(err, QuotaError::Transient("Request timed out".to_string()));
}

#[tokio::test]
async fn test_engine_against_mock_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(USAGE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(usage_body()))
        .mount(&server)
        .await;

    let mut handle = PollingEngine::new(
        ClaudeWebClient::with_base_url(server.uri()),
        CredentialConfig::new("sk-ant-test", "org-1"),
        EnvFallback::empty(),
    )
    .spawn();

    let state = tokio::time::timeout(Duration::from_secs(5), handle.next_state())
        .await
        .expect("engine published within 5s")
        .expect("engine still running");

    assert_eq!(state.phase, WidgetPhase::Ok);
    let snapshot = state.snapshot.as_ref().unwrap();
    assert_eq!(snapshot.get(&QuotaMetric::SevenDay).unwrap().utilization, 12.4);
    assert!(snapshot.get(&QuotaMetric::SevenDayOpus).is_none());

    // Default display: 7-day metric, percentage, status emoji, no reset known
    let title = state.title(&DisplayConfig::default(), chrono::Utc::now());
    assert_eq!(title, "✳️ 12%");

    handle.shutdown().await;
}
