//! Usage polling engine
//!
//! A single background task owns all mutable polling state and drives fetch
//! cycles. Callers talk to it through an [`EngineHandle`]: commands go in
//! over a channel, events come out over a broadcast channel, and the latest
//! [`WidgetSnapshot`] is published on a watch channel.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ worker task                                                   │
//! │                                                               │
//! │   select! {                                                   │
//! │     shutdown        ──► exit                                  │
//! │     ticker (30s)    ──► start cycle (skipped if busy/expired) │
//! │     commands        ──► refresh / credentials changed         │
//! │     advance(phase)  ──► response or backoff elapsed           │
//! │   }                                                           │
//! │                                                               │
//! │   Idle ──► Fetching{attempt} ──► Backoff{attempt+1} ──┐       │
//! │    ▲            │                                     │       │
//! │    └── outcome ─┘◄────────────────────────────────────┘       │
//! └───────────────────────────────────────────────────────────────┘
//!        │ broadcast<EngineEvent>        │ watch<Arc<WidgetSnapshot>>
//!        ▼                               ▼
//!     loggers, CLIs                 status lines, widgets
//! ```
//!
//! A cycle is one attempt plus its retries. At most one cycle is ever in
//! flight: scheduled ticks that land during a cycle are dropped, a manual
//! refresh during a cycle is coalesced into it, and a credentials change
//! during a cycle is applied as soon as the cycle ends.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior, Sleep};

use crate::config::{resolve_credentials, CredentialConfig, Credentials, EnvFallback};

use super::classifier::{classify_outcome, Classification, FailureKind};
use super::decoder;
use super::provider::{HttpResponse, QuotaError, UsageFetcher};
use super::types::QuotaSnapshot;
use super::widget::{Transition, WidgetSnapshot, WidgetStateMachine};

// ============================================================================
// Constants
// ============================================================================

/// Default time between scheduled cycles
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default bound on a single attempt
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Default retries after the first attempt of a cycle
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry; doubles per retry
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(1);

pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const MIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Buffered events per subscriber before the slowest one starts lagging
const EVENT_CAPACITY: usize = 64;

// ============================================================================
// Configuration
// ============================================================================

/// Timing knobs for the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingConfig {
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff: DEFAULT_BASE_BACKOFF,
        }
    }
}

impl PollingConfig {
    /// Validate and normalize the configuration
    pub fn validate(&self) -> Self {
        Self {
            poll_interval: self.poll_interval.max(MIN_POLL_INTERVAL),
            request_timeout: self.request_timeout.max(MIN_REQUEST_TIMEOUT),
            max_retries: self.max_retries.min(MAX_RETRIES_LIMIT),
            base_backoff: self.base_backoff.max(Duration::from_millis(1)),
        }
    }

    /// Delay before retrying after the given (zero-based) attempt
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }
}

// ============================================================================
// Events
// ============================================================================

/// What started a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Scheduled,
    Manual,
    CredentialsChanged,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Scheduled => write!(f, "scheduled"),
            Trigger::Manual => write!(f, "manual"),
            Trigger::CredentialsChanged => write!(f, "credentials_changed"),
        }
    }
}

/// Structured notifications emitted by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    FetchStarted {
        trigger: Trigger,
        attempt: u32,
    },
    FetchSucceeded {
        attempt: u32,
        metrics: usize,
    },
    FetchFailed {
        attempt: u32,
        kind: FailureKind,
        error: QuotaError,
    },
    RetryScheduled {
        /// Attempt that will run after the delay
        attempt: u32,
        delay: Duration,
    },
    /// Retries exhausted; the cycle ended without data
    CycleFailed {
        consecutive_failures: u32,
    },
    SessionExpired {
        status: u16,
        consecutive_failures: u32,
    },
    CredentialsMissing {
        error: QuotaError,
        consecutive_failures: u32,
    },
}

// ============================================================================
// Handle
// ============================================================================

#[derive(Debug)]
enum Command {
    Refresh,
    CredentialsChanged(CredentialConfig),
}

/// Cloneable sender for engine commands
#[derive(Debug, Clone)]
pub struct EngineController {
    commands: mpsc::UnboundedSender<Command>,
}

impl EngineController {
    /// Request a cycle now; returns `false` if the engine has stopped
    pub fn refresh(&self) -> bool {
        self.commands.send(Command::Refresh).is_ok()
    }

    /// Replace the credentials, clear expiry and failures, and fetch
    pub fn credentials_changed(&self, credentials: CredentialConfig) -> bool {
        self.commands
            .send(Command::CredentialsChanged(credentials))
            .is_ok()
    }
}

/// Owner-side handle to a running engine
///
/// Dropping the handle stops the worker.
pub struct EngineHandle {
    controller: EngineController,
    events: broadcast::Sender<EngineEvent>,
    state: watch::Receiver<Arc<WidgetSnapshot>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl EngineHandle {
    pub fn refresh(&self) -> bool {
        self.controller.refresh()
    }

    pub fn credentials_changed(&self, credentials: CredentialConfig) -> bool {
        self.controller.credentials_changed(credentials)
    }

    pub fn controller(&self) -> EngineController {
        self.controller.clone()
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Latest published state
    pub fn state(&self) -> Arc<WidgetSnapshot> {
        Arc::clone(&self.state.borrow())
    }

    /// Receiver that wakes on every publish
    pub fn watch(&self) -> watch::Receiver<Arc<WidgetSnapshot>> {
        self.state.clone()
    }

    /// Wait for the next publish; `None` once the engine has stopped
    pub async fn next_state(&mut self) -> Option<Arc<WidgetSnapshot>> {
        self.state.changed().await.ok()?;
        Some(Arc::clone(&self.state.borrow_and_update()))
    }

    /// Stop the worker and wait for it to exit
    ///
    /// An in-flight request is abandoned, not awaited.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("[quota:engine] Worker task failed: {}", e);
            }
        }
    }
}

// ============================================================================
// PollingEngine
// ============================================================================

/// Builder for the polling worker
///
/// # Example
///
/// ```ignore
/// use usagebar_core::config::{CredentialConfig, EnvFallback};
/// use usagebar_core::services::quota::{ClaudeWebClient, PollingEngine};
///
/// let handle = PollingEngine::new(
///     ClaudeWebClient::new(),
///     CredentialConfig::default(),
///     EnvFallback::from_process(),
/// )
/// .spawn();
///
/// let mut events = handle.subscribe();
/// while let Ok(event) = events.recv().await {
///     println!("{:?}", event);
/// }
/// ```
pub struct PollingEngine<F: UsageFetcher> {
    fetcher: Arc<F>,
    config: PollingConfig,
    credentials: CredentialConfig,
    env: EnvFallback,
}

impl<F: UsageFetcher + 'static> PollingEngine<F> {
    pub fn new(fetcher: F, credentials: CredentialConfig, env: EnvFallback) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            config: PollingConfig::default(),
            credentials,
            env,
        }
    }

    /// Use custom timing; tests may shorten intervals freely
    pub fn with_config(mut self, config: PollingConfig) -> Self {
        self.config = config;
        self
    }

    /// Start the worker on the current tokio runtime
    ///
    /// The first cycle starts immediately.
    pub fn spawn(self) -> EngineHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let widget = WidgetStateMachine::new();
        let (state_tx, state_rx) = watch::channel(widget.current());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        log::info!(
            "[quota:engine] Starting with {} (interval {}s, timeout {}s, {} retries)",
            self.fetcher.fetcher_id(),
            self.config.poll_interval.as_secs(),
            self.config.request_timeout.as_secs(),
            self.config.max_retries
        );

        let worker = Worker {
            fetcher: self.fetcher,
            config: self.config,
            credentials: self.credentials,
            env: self.env,
            state: PollingState::default(),
            widget,
            pending_credentials: None,
            events: events_tx.clone(),
            publisher: state_tx,
        };
        let task = tokio::spawn(worker.run(command_rx, shutdown_rx));

        EngineHandle {
            controller: EngineController {
                commands: command_tx,
            },
            events: events_tx,
            state: state_rx,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

// ============================================================================
// Worker (Internal)
// ============================================================================

/// Mutable polling state, private to the worker
#[derive(Debug, Default)]
struct PollingState {
    last_snapshot: Option<Arc<QuotaSnapshot>>,
    consecutive_failures: u32,
    session_expired: bool,
    in_flight_retry_count: u32,
}

/// Fixed inputs of one cycle
struct Cycle {
    trigger: Trigger,
    credentials: Credentials,
}

enum Phase {
    Idle,
    Fetching {
        cycle: Cycle,
        attempt: u32,
        request: BoxFuture<'static, Result<HttpResponse, QuotaError>>,
    },
    Backoff {
        cycle: Cycle,
        attempt: u32,
        sleep: std::pin::Pin<Box<Sleep>>,
    },
}

impl Phase {
    fn is_active(&self) -> bool {
        !matches!(self, Phase::Idle)
    }

    fn take_cycle(&mut self) -> Option<Cycle> {
        match std::mem::replace(self, Phase::Idle) {
            Phase::Idle => None,
            Phase::Fetching { cycle, .. } | Phase::Backoff { cycle, .. } => Some(cycle),
        }
    }
}

enum Step {
    Responded {
        attempt: u32,
        outcome: Result<HttpResponse, QuotaError>,
    },
    BackoffElapsed {
        attempt: u32,
    },
}

/// Drive the current phase to its next step
///
/// Cancel-safe: the request and the sleep live in `phase`, so dropping this
/// future loses no progress.
async fn advance(phase: &mut Phase) -> Step {
    match phase {
        Phase::Fetching {
            attempt, request, ..
        } => {
            let outcome = request.await;
            Step::Responded {
                attempt: *attempt,
                outcome,
            }
        }
        Phase::Backoff { attempt, sleep, .. } => {
            sleep.as_mut().await;
            Step::BackoffElapsed { attempt: *attempt }
        }
        Phase::Idle => std::future::pending().await,
    }
}

struct Worker<F: UsageFetcher> {
    fetcher: Arc<F>,
    config: PollingConfig,
    credentials: CredentialConfig,
    env: EnvFallback,
    state: PollingState,
    widget: WidgetStateMachine,
    pending_credentials: Option<CredentialConfig>,
    events: broadcast::Sender<EngineEvent>,
    publisher: watch::Sender<Arc<WidgetSnapshot>>,
}

impl<F: UsageFetcher + 'static> Worker<F> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut ticker = new_ticker(self.config.poll_interval);
        let mut phase = Phase::Idle;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("[quota:engine] Received shutdown signal");
                    break;
                }
                _ = ticker.tick() => self.on_tick(&mut phase),
                command = commands.recv() => match command {
                    Some(Command::Refresh) => self.on_refresh(&mut phase),
                    Some(Command::CredentialsChanged(credentials)) => {
                        self.on_credentials_changed(credentials, &mut phase)
                    }
                    None => {
                        log::info!("[quota:engine] All controllers dropped");
                        break;
                    }
                },
                step = advance(&mut phase), if phase.is_active() => self.on_step(step, &mut phase),
            }
        }

        log::info!("[quota:engine] Stopped");
    }

    // ------------------------------------------------------------------------
    // Triggers
    // ------------------------------------------------------------------------

    fn on_tick(&mut self, phase: &mut Phase) {
        if phase.is_active() {
            log::debug!("[quota:engine] Tick dropped, a cycle is in flight");
            return;
        }
        if self.state.session_expired {
            log::debug!("[quota:engine] Tick skipped, session expired");
            return;
        }
        *phase = self.start_cycle(Trigger::Scheduled);
    }

    fn on_refresh(&mut self, phase: &mut Phase) {
        if phase.is_active() {
            log::debug!("[quota:engine] Refresh coalesced into the cycle in flight");
            return;
        }
        *phase = self.start_cycle(Trigger::Manual);
    }

    fn on_credentials_changed(&mut self, credentials: CredentialConfig, phase: &mut Phase) {
        if phase.is_active() {
            log::info!("[quota:engine] Credentials changed mid-cycle, applying after it ends");
            self.pending_credentials = Some(credentials);
            return;
        }
        self.apply_credentials(credentials, phase);
    }

    fn apply_credentials(&mut self, credentials: CredentialConfig, phase: &mut Phase) {
        log::info!("[quota:engine] Credentials changed, clearing expiry and failures");
        self.credentials = credentials;
        self.state.session_expired = false;
        self.state.consecutive_failures = 0;
        self.publish(Transition::CredentialsChanged);
        *phase = self.start_cycle(Trigger::CredentialsChanged);
    }

    // ------------------------------------------------------------------------
    // Cycle
    // ------------------------------------------------------------------------

    fn start_cycle(&mut self, trigger: Trigger) -> Phase {
        match resolve_credentials(&self.credentials, &self.env) {
            Ok(credentials) => self.start_attempt(
                Cycle {
                    trigger,
                    credentials,
                },
                0,
            ),
            Err(error) => {
                self.state.consecutive_failures += 1;
                self.state.in_flight_retry_count = 0;
                let consecutive_failures = self.state.consecutive_failures;
                self.emit(EngineEvent::CredentialsMissing {
                    error: error.clone(),
                    consecutive_failures,
                });
                self.publish(Transition::NeedsSetup {
                    consecutive_failures,
                    error,
                });
                Phase::Idle
            }
        }
    }

    fn start_attempt(&mut self, cycle: Cycle, attempt: u32) -> Phase {
        self.emit(EngineEvent::FetchStarted {
            trigger: cycle.trigger,
            attempt,
        });

        let fetcher = Arc::clone(&self.fetcher);
        let credentials = cycle.credentials.clone();
        let timeout = self.config.request_timeout;
        let request = async move {
            match tokio::time::timeout(timeout, fetcher.fetch(&credentials)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(QuotaError::Timeout(timeout)),
            }
        }
        .boxed();

        Phase::Fetching {
            cycle,
            attempt,
            request,
        }
    }

    fn on_step(&mut self, step: Step, phase: &mut Phase) {
        let Some(cycle) = phase.take_cycle() else {
            return;
        };

        *phase = match step {
            Step::BackoffElapsed { attempt } => self.start_attempt(cycle, attempt),
            Step::Responded { attempt, outcome } => self.on_outcome(cycle, attempt, outcome),
        };

        if !phase.is_active() {
            if let Some(credentials) = self.pending_credentials.take() {
                self.apply_credentials(credentials, phase);
            }
        }
    }

    fn on_outcome(
        &mut self,
        cycle: Cycle,
        attempt: u32,
        outcome: Result<HttpResponse, QuotaError>,
    ) -> Phase {
        let error = match (classify_outcome(&outcome), outcome) {
            (Classification::Success, Ok(response)) => {
                match decoder::decode(&response.body, Utc::now()) {
                    Ok(snapshot) => {
                        self.succeed(snapshot, attempt);
                        return Phase::Idle;
                    }
                    Err(error) => error,
                }
            }
            (Classification::Failure(FailureKind::CredentialExpired), Ok(response)) => {
                self.expire(attempt, response.status);
                return Phase::Idle;
            }
            (Classification::Failure(FailureKind::SoftBlocked), Ok(response)) => {
                QuotaError::SoftBlocked(response.status)
            }
            (_, Ok(response)) => QuotaError::Transient(format!("HTTP {}", response.status)),
            (_, Err(error)) => error,
        };

        self.emit(EngineEvent::FetchFailed {
            attempt,
            kind: error.kind().unwrap_or(FailureKind::Transient),
            error: error.clone(),
        });

        if attempt < self.config.max_retries {
            let delay = self.config.backoff_delay(attempt);
            self.state.in_flight_retry_count = attempt + 1;
            self.emit(EngineEvent::RetryScheduled {
                attempt: attempt + 1,
                delay,
            });
            return Phase::Backoff {
                cycle,
                attempt: attempt + 1,
                sleep: Box::pin(tokio::time::sleep(delay)),
            };
        }

        self.state.consecutive_failures += 1;
        self.state.in_flight_retry_count = 0;
        let consecutive_failures = self.state.consecutive_failures;
        self.emit(EngineEvent::CycleFailed {
            consecutive_failures,
        });
        self.publish(Transition::CycleFailed {
            consecutive_failures,
            error,
        });
        Phase::Idle
    }

    fn succeed(&mut self, snapshot: QuotaSnapshot, attempt: u32) {
        let snapshot = Arc::new(snapshot);
        self.state.last_snapshot = Some(Arc::clone(&snapshot));
        self.state.consecutive_failures = 0;
        self.state.session_expired = false;
        self.state.in_flight_retry_count = 0;
        self.emit(EngineEvent::FetchSucceeded {
            attempt,
            metrics: snapshot.limits.len(),
        });
        self.publish(Transition::Succeeded(snapshot));
    }

    fn expire(&mut self, attempt: u32, status: u16) {
        let error = QuotaError::CredentialExpired(status);
        self.emit(EngineEvent::FetchFailed {
            attempt,
            kind: FailureKind::CredentialExpired,
            error: error.clone(),
        });

        self.state.session_expired = true;
        self.state.consecutive_failures += 1;
        self.state.in_flight_retry_count = 0;
        let consecutive_failures = self.state.consecutive_failures;
        self.emit(EngineEvent::SessionExpired {
            status,
            consecutive_failures,
        });
        self.publish(Transition::SessionExpired {
            consecutive_failures,
            error,
        });
    }

    // ------------------------------------------------------------------------
    // Outputs
    // ------------------------------------------------------------------------

    fn publish(&mut self, transition: Transition) {
        let state = self.widget.apply(transition, Utc::now());
        self.publisher.send_replace(state);
    }

    fn emit(&self, event: EngineEvent) {
        log_event(&event, &self.state);
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn new_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

fn log_event(event: &EngineEvent, state: &PollingState) {
    match event {
        EngineEvent::FetchStarted { trigger, attempt } => {
            log::debug!(
                "[quota:engine] Fetch started ({}, attempt {}, retries so far {})",
                trigger,
                attempt,
                state.in_flight_retry_count
            );
        }
        EngineEvent::FetchSucceeded { attempt, metrics } => {
            log::info!(
                "[quota:engine] Fetch succeeded on attempt {} ({} metrics)",
                attempt,
                metrics
            );
        }
        EngineEvent::FetchFailed {
            attempt,
            kind: FailureKind::SoftBlocked,
            error,
        } => {
            log::warn!(
                "[quota:engine] Soft-blocked by verification challenge on attempt {}: {}",
                attempt,
                error
            );
        }
        EngineEvent::FetchFailed {
            attempt,
            kind,
            error,
        } => {
            log::warn!(
                "[quota:engine] Attempt {} failed ({}): {}",
                attempt,
                kind,
                error
            );
        }
        EngineEvent::RetryScheduled { attempt, delay } => {
            log::info!(
                "[quota:engine] Retrying in {:?} (attempt {})",
                delay,
                attempt
            );
        }
        EngineEvent::CycleFailed {
            consecutive_failures,
        } => {
            log::error!(
                "[quota:engine] Retries exhausted (consecutive failures: {})",
                consecutive_failures
            );
        }
        EngineEvent::SessionExpired {
            status,
            consecutive_failures,
        } => {
            log::error!(
                "[quota:engine] Session expired (HTTP {}), scheduled polling suspended (consecutive failures: {})",
                status,
                consecutive_failures
            );
        }
        EngineEvent::CredentialsMissing {
            error,
            consecutive_failures,
        } => {
            log::warn!(
                "[quota:engine] {} (consecutive failures: {})",
                error,
                consecutive_failures
            );
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
