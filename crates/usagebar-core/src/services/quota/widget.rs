//! Widget state
//!
//! The only state presentation layers read. The polling engine drives a
//! [`WidgetStateMachine`] with one [`Transition`] per cycle outcome and
//! publishes the resulting [`WidgetSnapshot`]; readers turn it into a
//! [`WidgetState`] for their selected metric at the current time.
//!
//! ```text
//!            ┌──────────► ok ◄──────────┐
//!  loading ──┼──────────► needs_setup   │  (every cycle outcome
//!            └──────────► session_expired┘   re-enters the machine)
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::display::{
    format_reset_time, render, status_message, TITLE_ERROR, TITLE_LOADING, TITLE_SESSION_EXPIRED,
};
use super::pacing::MetricPacing;
use super::provider::QuotaError;
use super::types::{DisplayConfig, PacingStatus, QuotaMetric, QuotaSnapshot};

/// Consecutive failed cycles after which the failure indicator is shown
pub const FAILING_THRESHOLD: u32 = 3;

// ============================================================================
// Published State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetPhase {
    Loading,
    Ok,
    NeedsSetup,
    SessionExpired,
}

impl std::fmt::Display for WidgetPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WidgetPhase::Loading => write!(f, "loading"),
            WidgetPhase::Ok => write!(f, "ok"),
            WidgetPhase::NeedsSetup => write!(f, "needs_setup"),
            WidgetPhase::SessionExpired => write!(f, "session_expired"),
        }
    }
}

/// How the recent cycles went
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    /// One or two failed cycles in a row
    Degraded,
    /// [`FAILING_THRESHOLD`] or more failed cycles in a row
    Failing,
}

impl Health {
    pub fn from_failures(consecutive_failures: u32) -> Self {
        match consecutive_failures {
            0 => Health::Healthy,
            n if n < FAILING_THRESHOLD => Health::Degraded,
            _ => Health::Failing,
        }
    }
}

/// Immutable state published after every cycle outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WidgetSnapshot {
    pub phase: WidgetPhase,
    /// Last successfully decoded snapshot, kept across failures
    pub snapshot: Option<Arc<QuotaSnapshot>>,
    pub consecutive_failures: u32,
    pub health: Health,
    /// Error that ended the last failed cycle
    #[serde(serialize_with = "serialize_error")]
    pub last_error: Option<QuotaError>,
    pub updated_at: Option<DateTime<Utc>>,
}

fn serialize_error<S: serde::Serializer>(
    error: &Option<QuotaError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl Default for WidgetSnapshot {
    fn default() -> Self {
        Self {
            phase: WidgetPhase::Loading,
            snapshot: None,
            consecutive_failures: 0,
            health: Health::Healthy,
            last_error: None,
            updated_at: None,
        }
    }
}

impl WidgetSnapshot {
    /// Derive the view for a metric at `now`
    ///
    /// An `ok` phase without a renderable metric degrades to `Loading`.
    pub fn state(&self, metric: &QuotaMetric, now: DateTime<Utc>) -> WidgetState {
        match self.phase {
            WidgetPhase::Loading => WidgetState::Loading,
            WidgetPhase::NeedsSetup => WidgetState::NeedsSetup,
            WidgetPhase::SessionExpired => WidgetState::SessionExpired,
            WidgetPhase::Ok => self
                .snapshot
                .as_deref()
                .and_then(|snapshot| WidgetView::build(snapshot, metric, now))
                .map(WidgetState::Ok)
                .unwrap_or(WidgetState::Loading),
        }
    }

    /// Compact title for a status line
    pub fn title(&self, config: &DisplayConfig, now: DateTime<Utc>) -> String {
        match self.phase {
            WidgetPhase::Loading => return TITLE_LOADING.to_string(),
            WidgetPhase::NeedsSetup => return TITLE_ERROR.to_string(),
            WidgetPhase::SessionExpired => return TITLE_SESSION_EXPIRED.to_string(),
            WidgetPhase::Ok => {}
        }

        if self.health == Health::Failing {
            return TITLE_ERROR.to_string();
        }

        let Some(snapshot) = self.snapshot.as_deref() else {
            return TITLE_LOADING.to_string();
        };
        match snapshot.get(&config.selected_metric) {
            Some(limit) => {
                let pacing = MetricPacing::assess(&config.selected_metric, limit, now);
                render(pacing.utilization, pacing.expected, pacing.status, config)
            }
            None => TITLE_ERROR.to_string(),
        }
    }

    pub fn is_failing(&self) -> bool {
        self.health == Health::Failing
    }
}

// ============================================================================
// Derived View
// ============================================================================

/// What a reader renders for one metric
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "view", rename_all = "snake_case")]
pub enum WidgetState {
    Loading,
    Ok(WidgetView),
    NeedsSetup,
    SessionExpired,
}

/// Snapshot-derived figures for one metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WidgetView {
    pub metric_name: String,
    pub utilization: f64,
    pub expected_usage: Option<f64>,
    pub reset_time: String,
    /// Raw pacing status, used for icons and colors
    pub status: PacingStatus,
    /// Advice with the limit-reached override applied
    pub message: String,
}

impl WidgetView {
    /// Build the view, `None` when the snapshot lacks the metric
    pub fn build(snapshot: &QuotaSnapshot, metric: &QuotaMetric, now: DateTime<Utc>) -> Option<Self> {
        let limit = snapshot.get(metric)?;
        let pacing = MetricPacing::assess(metric, limit, now);
        Some(Self {
            metric_name: metric.short_name(),
            utilization: pacing.utilization,
            expected_usage: pacing.expected,
            reset_time: format_reset_time(limit.resets_at, now),
            status: pacing.status,
            message: status_message(pacing.utilization, pacing.status).to_string(),
        })
    }
}

// ============================================================================
// State Machine
// ============================================================================

/// Outcome the engine feeds into the machine
#[derive(Debug, Clone)]
pub enum Transition {
    Succeeded(Arc<QuotaSnapshot>),
    /// Retries exhausted on transient failures
    CycleFailed {
        consecutive_failures: u32,
        error: QuotaError,
    },
    NeedsSetup {
        consecutive_failures: u32,
        error: QuotaError,
    },
    SessionExpired {
        consecutive_failures: u32,
        error: QuotaError,
    },
    CredentialsChanged,
}

/// Holds the current published state and applies transitions
#[derive(Debug, Default)]
pub struct WidgetStateMachine {
    current: Arc<WidgetSnapshot>,
}

impl WidgetStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Arc<WidgetSnapshot> {
        Arc::clone(&self.current)
    }

    pub fn phase(&self) -> WidgetPhase {
        self.current.phase
    }

    /// Apply an outcome and return the state to publish
    pub fn apply(&mut self, transition: Transition, at: DateTime<Utc>) -> Arc<WidgetSnapshot> {
        let prev = &self.current;
        let next = match transition {
            Transition::Succeeded(snapshot) => WidgetSnapshot {
                phase: WidgetPhase::Ok,
                snapshot: Some(snapshot),
                consecutive_failures: 0,
                health: Health::Healthy,
                last_error: None,
                updated_at: Some(at),
            },
            Transition::CycleFailed {
                consecutive_failures,
                error,
            } => WidgetSnapshot {
                // Stale data stays visible; an expired session stays expired
                phase: match prev.phase {
                    WidgetPhase::Ok => WidgetPhase::Ok,
                    WidgetPhase::SessionExpired => WidgetPhase::SessionExpired,
                    WidgetPhase::Loading | WidgetPhase::NeedsSetup => WidgetPhase::Loading,
                },
                snapshot: prev.snapshot.clone(),
                consecutive_failures,
                health: Health::from_failures(consecutive_failures),
                last_error: Some(error),
                updated_at: Some(at),
            },
            Transition::NeedsSetup {
                consecutive_failures,
                error,
            } => WidgetSnapshot {
                phase: WidgetPhase::NeedsSetup,
                snapshot: prev.snapshot.clone(),
                consecutive_failures,
                health: Health::from_failures(consecutive_failures),
                last_error: Some(error),
                updated_at: Some(at),
            },
            Transition::SessionExpired {
                consecutive_failures,
                error,
            } => WidgetSnapshot {
                phase: WidgetPhase::SessionExpired,
                snapshot: prev.snapshot.clone(),
                consecutive_failures,
                health: Health::from_failures(consecutive_failures),
                last_error: Some(error),
                updated_at: Some(at),
            },
            Transition::CredentialsChanged => WidgetSnapshot {
                phase: match prev.phase {
                    WidgetPhase::Ok => WidgetPhase::Ok,
                    _ => WidgetPhase::Loading,
                },
                snapshot: prev.snapshot.clone(),
                consecutive_failures: 0,
                health: Health::Healthy,
                last_error: None,
                updated_at: Some(at),
            },
        };

        if next.phase != prev.phase {
            log::debug!("[quota:widget] {} -> {}", prev.phase, next.phase);
        }
        self.current = Arc::new(next);
        self.current()
    }
}

// ============================================================================
// Tests
// ============================================================================
