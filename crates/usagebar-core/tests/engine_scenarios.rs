//! Polling engine behavior with a scripted fetcher and a paused clock
//!
//! Every test runs with `start_paused = true`: sleeps and timeouts resolve
//! instantly once the runtime is idle, so backoff delays are observed
//! exactly.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::Instant;

use usagebar_core::config::{CredentialConfig, Credentials, EnvFallback, SESSION_KEY_ENV};
use usagebar_core::services::quota::{
    EngineEvent, EngineHandle, FailureKind, HttpResponse, PollingConfig, PollingEngine, QuotaError,
    QuotaMetric, Trigger, UsageFetcher, WidgetPhase,
};

const OK_BODY: &str = r#"{"five_hour": {"utilization": 42.0, "resets_at": null}, "seven_day": {"utilization": 10.0}}"#;
const CHALLENGE_BODY: &str = "<html><head><title>Just a moment...</title></head></html>";
const AUTH_ERROR_BODY: &str = r#"{"type":"error","error":{"type":"permission_error"}}"#;

// ============================================================================
// Scripted fetcher
// ============================================================================

type Outcome = Result<HttpResponse, QuotaError>;

#[derive(Clone, Default)]
struct Script {
    inner: Arc<Mutex<ScriptState>>,
}

#[derive(Default)]
struct ScriptState {
    queue: VecDeque<Outcome>,
    fallback: Option<Outcome>,
    delay: Duration,
    calls: Vec<(Instant, String)>,
}

impl Script {
    fn new() -> Self {
        Self::default()
    }

    fn then(self, outcome: Outcome) -> Self {
        self.inner.lock().unwrap().queue.push_back(outcome);
        self
    }

    fn then_status(self, status: u16, body: &str) -> Self {
        self.then(Ok(HttpResponse::new(status, body)))
    }

    fn always_status(self, status: u16, body: &str) -> Self {
        self.inner.lock().unwrap().fallback = Some(Ok(HttpResponse::new(status, body)));
        self
    }

    fn with_delay(self, delay: Duration) -> Self {
        self.inner.lock().unwrap().delay = delay;
        self
    }

    fn calls(&self) -> usize {
        self.inner.lock().unwrap().calls.len()
    }

    fn call_times(&self) -> Vec<Instant> {
        self.inner.lock().unwrap().calls.iter().map(|(t, _)| *t).collect()
    }

    fn session_keys(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.iter().map(|(_, k)| k.clone()).collect()
    }
}

#[async_trait]
impl UsageFetcher for Script {
    fn fetcher_id(&self) -> &'static str {
        "script"
    }

    async fn fetch(&self, credentials: &Credentials) -> Outcome {
        let (outcome, delay) = {
            let mut state = self.inner.lock().unwrap();
            state
                .calls
                .push((Instant::now(), credentials.session_key.clone()));
            let outcome = state
                .queue
                .pop_front()
                .or_else(|| state.fallback.clone())
                .unwrap_or_else(|| Ok(HttpResponse::new(200, OK_BODY)));
            (outcome, state.delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn credentials() -> CredentialConfig {
    CredentialConfig::new("sk-ant-1", "org-1")
}

fn spawn(script: &Script) -> (EngineHandle, broadcast::Receiver<EngineEvent>) {
    spawn_with(script, credentials(), EnvFallback::empty())
}

fn spawn_with(
    script: &Script,
    credentials: CredentialConfig,
    env: EnvFallback,
) -> (EngineHandle, broadcast::Receiver<EngineEvent>) {
    let handle = PollingEngine::new(script.clone(), credentials, env)
        .with_config(PollingConfig::default())
        .spawn();
    // The worker has not been polled yet, so nothing is missed
    let events = handle.subscribe();
    (handle, events)
}

/// Receive events until one matches, returning everything seen
async fn collect_until(
    events: &mut broadcast::Receiver<EngineEvent>,
    done: impl Fn(&EngineEvent) -> bool,
) -> Vec<EngineEvent> {
    let mut seen = Vec::new();
    loop {
        let event = events.recv().await.expect("engine stopped");
        let stop = done(&event);
        seen.push(event);
        if stop {
            return seen;
        }
    }
}

fn is_terminal(event: &EngineEvent) -> bool {
    matches!(
        event,
        EngineEvent::FetchSucceeded { .. }
            | EngineEvent::CycleFailed { .. }
            | EngineEvent::SessionExpired { .. }
            | EngineEvent::CredentialsMissing { .. }
    )
}

// ============================================================================
// Success
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_first_cycle_runs_immediately() {
    let script = Script::new();
    let (mut handle, mut events) = spawn(&script);

    let seen = collect_until(&mut events, is_terminal).await;
    assert_eq!(
        seen,
        vec![
            EngineEvent::FetchStarted {
                trigger: Trigger::Scheduled,
                attempt: 0
            },
            EngineEvent::FetchSucceeded {
                attempt: 0,
                metrics: 2
            },
        ]
    );

    let state = handle.next_state().await.unwrap();
    assert_eq!(state.phase, WidgetPhase::Ok);
    assert_eq!(state.consecutive_failures, 0);
    assert_eq!(
        state
            .snapshot
            .as_ref()
            .unwrap()
            .get(&QuotaMetric::FiveHour)
            .unwrap()
            .utilization,
        42.0
    );

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_cycles_every_30_seconds() {
    let script = Script::new();
    let (handle, mut events) = spawn(&script);

    for _ in 0..3 {
        collect_until(&mut events, is_terminal).await;
    }

    let times = script.call_times();
    assert_eq!(times.len(), 3);
    assert_eq!(times[1] - times[0], Duration::from_secs(30));
    assert_eq!(times[2] - times[1], Duration::from_secs(30));

    handle.shutdown().await;
}

// ============================================================================
// Transient failures and retries
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_transient_failures_back_off_then_fail_cycle() {
    let script = Script::new().always_status(500, "Internal Server Error");
    let (mut handle, mut events) = spawn(&script);

    let seen = collect_until(&mut events, is_terminal).await;

    let delays: Vec<Duration> = seen
        .iter()
        .filter_map(|e| match e {
            EngineEvent::RetryScheduled { delay, .. } => Some(*delay),
            _ => None,
        })
        .collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4)
        ]
    );
    assert_eq!(
        seen.last(),
        Some(&EngineEvent::CycleFailed {
            consecutive_failures: 1
        })
    );

    // One initial attempt plus three retries, spaced by the backoff
    let times = script.call_times();
    assert_eq!(times.len(), 4);
    assert_eq!(times[1] - times[0], Duration::from_secs(1));
    assert_eq!(times[2] - times[1], Duration::from_secs(2));
    assert_eq!(times[3] - times[2], Duration::from_secs(4));

    let state = handle.next_state().await.unwrap();
    assert_eq!(state.consecutive_failures, 1);
    assert_eq!(state.phase, WidgetPhase::Loading);
    assert_eq!(
        state.last_error,
        Some(QuotaError::Transient("HTTP 500".to_string()))
    );

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failing_after_three_failed_cycles() {
    let script = Script::new().always_status(502, "Bad Gateway");
    let (handle, mut events) = spawn(&script);

    for expected in 1..=3 {
        let seen = collect_until(&mut events, is_terminal).await;
        assert_eq!(
            seen.last(),
            Some(&EngineEvent::CycleFailed {
                consecutive_failures: expected
            })
        );
    }

    assert!(handle.state().is_failing());
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_recovery_resets_failures() {
    let script = Script::new()
        .then_status(500, "")
        .then_status(500, "")
        .then_status(200, OK_BODY);
    let (handle, mut events) = spawn(&script);

    let seen = collect_until(&mut events, is_terminal).await;
    assert_eq!(
        seen.last(),
        Some(&EngineEvent::FetchSucceeded {
            attempt: 2,
            metrics: 2
        })
    );
    assert_eq!(script.calls(), 3);
    assert_eq!(handle.state().consecutive_failures, 0);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_decode_failure_is_retried() {
    let script = Script::new()
        .then_status(200, "<html>maintenance</html>")
        .then_status(200, OK_BODY);
    let (handle, mut events) = spawn(&script);

    let seen = collect_until(&mut events, is_terminal).await;
    assert!(seen.iter().any(|e| matches!(
        e,
        EngineEvent::FetchFailed {
            attempt: 0,
            kind: FailureKind::Transient,
            error: QuotaError::Decode(_)
        }
    )));
    assert!(matches!(seen.last(), Some(EngineEvent::FetchSucceeded { attempt: 1, .. })));

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_attempt_timeout_is_transient() {
    let script = Script::new().with_delay(Duration::from_secs(20));
    let (handle, mut events) = spawn(&script);

    let seen = collect_until(&mut events, |e| {
        matches!(e, EngineEvent::FetchFailed { .. })
    })
    .await;
    assert_eq!(
        seen.last(),
        Some(&EngineEvent::FetchFailed {
            attempt: 0,
            kind: FailureKind::Transient,
            error: QuotaError::Timeout(Duration::from_secs(15)),
        })
    );

    handle.shutdown().await;
}

// ============================================================================
// Soft blocks and credential expiry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_soft_block_follows_retry_policy() {
    let script = Script::new().always_status(403, CHALLENGE_BODY);
    let (handle, mut events) = spawn(&script);

    let seen = collect_until(&mut events, is_terminal).await;

    let soft_blocks = seen
        .iter()
        .filter(|e| {
            matches!(
                e,
                EngineEvent::FetchFailed {
                    kind: FailureKind::SoftBlocked,
                    error: QuotaError::SoftBlocked(403),
                    ..
                }
            )
        })
        .count();
    assert_eq!(soft_blocks, 4);
    assert!(!seen.iter().any(|e| matches!(e, EngineEvent::SessionExpired { .. })));
    assert_eq!(
        seen.last(),
        Some(&EngineEvent::CycleFailed {
            consecutive_failures: 1
        })
    );
    assert_ne!(handle.state().phase, WidgetPhase::SessionExpired);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_credential_expiry_suspends_schedule() {
    let script = Script::new().then_status(401, AUTH_ERROR_BODY);
    let (handle, mut events) = spawn(&script);

    let seen = collect_until(&mut events, is_terminal).await;
    assert_eq!(
        seen.last(),
        Some(&EngineEvent::SessionExpired {
            status: 401,
            consecutive_failures: 1
        })
    );
    assert!(!seen.iter().any(|e| matches!(e, EngineEvent::RetryScheduled { .. })));
    assert_eq!(handle.state().phase, WidgetPhase::SessionExpired);

    // Several scheduled ticks pass without a request
    tokio::time::sleep(Duration::from_secs(95)).await;
    assert_eq!(script.calls(), 1);

    // New credentials clear the expiry and fetch right away
    assert!(handle.credentials_changed(CredentialConfig::new("sk-ant-2", "org-1")));
    let seen = collect_until(&mut events, is_terminal).await;
    assert_eq!(
        seen.first(),
        Some(&EngineEvent::FetchStarted {
            trigger: Trigger::CredentialsChanged,
            attempt: 0
        })
    );
    assert!(matches!(seen.last(), Some(EngineEvent::FetchSucceeded { .. })));
    assert_eq!(script.session_keys(), vec!["sk-ant-1", "sk-ant-2"]);

    let state = handle.state();
    assert_eq!(state.phase, WidgetPhase::Ok);
    assert_eq!(state.consecutive_failures, 0);

    // And the schedule is back
    collect_until(&mut events, is_terminal).await;
    assert_eq!(script.calls(), 3);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_manual_refresh_allowed_while_expired() {
    let script = Script::new()
        .then_status(403, AUTH_ERROR_BODY)
        .then_status(403, AUTH_ERROR_BODY);
    let (handle, mut events) = spawn(&script);

    collect_until(&mut events, is_terminal).await;
    assert!(handle.refresh());

    let seen = collect_until(&mut events, is_terminal).await;
    assert_eq!(
        seen.first(),
        Some(&EngineEvent::FetchStarted {
            trigger: Trigger::Manual,
            attempt: 0
        })
    );
    assert_eq!(
        seen.last(),
        Some(&EngineEvent::SessionExpired {
            status: 403,
            consecutive_failures: 2
        })
    );

    handle.shutdown().await;
}

// ============================================================================
// Missing credentials
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_missing_credentials_needs_setup_without_retry() {
    let script = Script::new();
    let (mut handle, mut events) =
        spawn_with(&script, CredentialConfig::default(), EnvFallback::empty());

    let seen = collect_until(&mut events, is_terminal).await;
    assert_eq!(
        seen,
        vec![EngineEvent::CredentialsMissing {
            error: QuotaError::MissingCredentials("No session key configured".to_string()),
            consecutive_failures: 1,
        }]
    );
    assert_eq!(script.calls(), 0);

    let state = handle.next_state().await.unwrap();
    assert_eq!(state.phase, WidgetPhase::NeedsSetup);
    assert_eq!(state.consecutive_failures, 1);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_env_fallback_credentials() {
    let script = Script::new();
    let env = EnvFallback::from_pairs([
        (SESSION_KEY_ENV, "sk-from-env"),
        ("CLAUDE_ORGANIZATION_ID", "org-env"),
    ]);
    let (handle, mut events) = spawn_with(&script, CredentialConfig::default(), env);

    let seen = collect_until(&mut events, is_terminal).await;
    assert!(matches!(seen.last(), Some(EngineEvent::FetchSucceeded { .. })));
    assert_eq!(script.session_keys(), vec!["sk-from-env"]);

    handle.shutdown().await;
}

// ============================================================================
// Serialization of cycles
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_refresh_during_cycle_is_coalesced() {
    let script = Script::new().with_delay(Duration::from_secs(3));
    let (handle, mut events) = spawn(&script);

    // Let the first request get in flight, then ask for more
    collect_until(&mut events, |e| matches!(e, EngineEvent::FetchStarted { .. })).await;
    assert!(handle.refresh());
    assert!(handle.refresh());

    collect_until(&mut events, is_terminal).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(script.calls(), 1);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_refresh_during_backoff_is_coalesced() {
    let script = Script::new().then_status(500, "").then_status(200, OK_BODY);
    let (handle, mut events) = spawn(&script);

    collect_until(&mut events, |e| matches!(e, EngineEvent::RetryScheduled { .. })).await;
    assert!(handle.refresh());

    let seen = collect_until(&mut events, is_terminal).await;
    assert!(matches!(seen.last(), Some(EngineEvent::FetchSucceeded { attempt: 1, .. })));
    assert!(!seen.iter().any(|e| matches!(
        e,
        EngineEvent::FetchStarted { trigger: Trigger::Manual, .. }
    )));

    // The retry still waited out its full delay
    let times = script.call_times();
    assert_eq!(times.len(), 2);
    assert_eq!(times[1] - times[0], Duration::from_secs(1));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(script.calls(), 2);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_ticks_during_long_cycle_are_dropped() {
    // 4 attempts timing out at 15s each plus 7s of backoff spans two ticks
    let script = Script::new().with_delay(Duration::from_secs(60));
    let (handle, mut events) = spawn(&script);

    let seen = collect_until(&mut events, is_terminal).await;
    let attempts: Vec<u32> = seen
        .iter()
        .filter_map(|e| match e {
            EngineEvent::FetchStarted { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![0, 1, 2, 3]);
    assert_eq!(script.calls(), 4);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_credentials_change_mid_cycle_is_applied_after() {
    let script = Script::new()
        .with_delay(Duration::from_secs(2))
        .then_status(500, "")
        .then_status(200, OK_BODY)
        .then_status(200, OK_BODY);
    let (handle, mut events) = spawn(&script);

    collect_until(&mut events, |e| matches!(e, EngineEvent::FetchStarted { .. })).await;
    assert!(handle.credentials_changed(CredentialConfig::new("sk-ant-2", "org-1")));

    // The running cycle finishes with the old key
    let first = collect_until(&mut events, is_terminal).await;
    assert!(matches!(first.last(), Some(EngineEvent::FetchSucceeded { attempt: 1, .. })));

    let second = collect_until(&mut events, is_terminal).await;
    assert_eq!(
        second.first(),
        Some(&EngineEvent::FetchStarted {
            trigger: Trigger::CredentialsChanged,
            attempt: 0
        })
    );
    assert_eq!(script.session_keys(), vec!["sk-ant-1", "sk-ant-1", "sk-ant-2"]);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_worker() {
    let script = Script::new();
    let (handle, mut events) = spawn(&script);
    collect_until(&mut events, is_terminal).await;

    let controller = handle.controller();
    handle.shutdown().await;

    assert!(!controller.refresh());
    assert!(matches!(
        events.recv().await,
        Err(broadcast::error::RecvError::Closed)
    ));
}
