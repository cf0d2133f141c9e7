//! Time-window pacing
//!
//! Turns "percent used so far" into "percent expected to be used by now",
//! assuming linear consumption across the current reset window, and
//! classifies the difference into a [`PacingStatus`].
//!
//! Everything here is a pure function of its inputs and `now`.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::types::{PacingStatus, QuotaLimit, QuotaMetric};

// ============================================================================
// Constants
// ============================================================================

/// Half-width of the band around the expected usage that counts as borderline
pub const PACE_TOLERANCE: f64 = 5.0;

/// Static threshold used when the window position is unknown
pub const FALLBACK_EXCEEDING_THRESHOLD: f64 = 80.0;

/// Static threshold used when the window position is unknown
pub const FALLBACK_BORDERLINE_THRESHOLD: f64 = 50.0;

/// Utilization at which the limit is exhausted regardless of pace
pub const LIMIT_REACHED: f64 = 100.0;

// ============================================================================
// Window Model
// ============================================================================

/// Percentage of the window that has elapsed at `now`
///
/// Returns `None` when there is no reset time, when the reset is already in
/// the past, or when the reset lies more than one full window away (the
/// timestamp then does not describe the current window).
pub fn expected_usage(
    resets_at: Option<DateTime<Utc>>,
    window: Duration,
    now: DateTime<Utc>,
) -> Option<f64> {
    let resets_at = resets_at?;
    let window_ms = window.num_milliseconds();
    if window_ms <= 0 {
        return None;
    }

    let remaining_ms = (resets_at - now).num_milliseconds();
    if remaining_ms <= 0 || remaining_ms > window_ms {
        return None;
    }

    let elapsed_ms = window_ms - remaining_ms;
    Some(100.0 * elapsed_ms as f64 / window_ms as f64)
}

/// Classify utilization against linear pacing
///
/// With a known window position, utilization within ±5 points of the
/// expected usage is borderline. Without one, static thresholds apply.
/// Utilization of 100 or more is not special-cased here; see
/// [`effective_status`].
pub fn classify(
    utilization: f64,
    resets_at: Option<DateTime<Utc>>,
    window: Duration,
    now: DateTime<Utc>,
) -> PacingStatus {
    match expected_usage(resets_at, window, now) {
        Some(expected) => classify_against(utilization, expected),
        None => classify_static(utilization),
    }
}

/// Compare utilization to a known expected usage
pub fn classify_against(utilization: f64, expected: f64) -> PacingStatus {
    if utilization < expected - PACE_TOLERANCE {
        PacingStatus::OnTrack
    } else if utilization <= expected + PACE_TOLERANCE {
        PacingStatus::Borderline
    } else {
        PacingStatus::Exceeding
    }
}

/// Threshold classification used when the window position is unknown
pub fn classify_static(utilization: f64) -> PacingStatus {
    if utilization >= FALLBACK_EXCEEDING_THRESHOLD {
        PacingStatus::Exceeding
    } else if utilization >= FALLBACK_BORDERLINE_THRESHOLD {
        PacingStatus::Borderline
    } else {
        PacingStatus::OnTrack
    }
}

/// Whether the limit is used up
pub fn is_limit_reached(utilization: f64) -> bool {
    utilization >= LIMIT_REACHED
}

/// Status for user-facing copy
///
/// Applies the limit-reached override on top of the raw pacing status.
/// Icons and colors keep using the raw status.
pub fn effective_status(utilization: f64, raw: PacingStatus) -> PacingStatus {
    if is_limit_reached(utilization) {
        PacingStatus::Exceeding
    } else {
        raw
    }
}

// ============================================================================
// Per-metric Assessment
// ============================================================================

/// Pacing figures for one metric at one instant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricPacing {
    pub metric: QuotaMetric,
    pub utilization: f64,
    pub expected: Option<f64>,
    pub status: PacingStatus,
    pub resets_at: Option<DateTime<Utc>>,
}

impl MetricPacing {
    /// Assess a limit reading against its metric's window
    pub fn assess(metric: &QuotaMetric, limit: &QuotaLimit, now: DateTime<Utc>) -> Self {
        let window = metric.window_duration();
        Self {
            metric: metric.clone(),
            utilization: limit.utilization,
            expected: expected_usage(limit.resets_at, window, now),
            status: classify(limit.utilization, limit.resets_at, window, now),
            resets_at: limit.resets_at,
        }
    }

    pub fn is_limit_reached(&self) -> bool {
        is_limit_reached(self.utilization)
    }
}

// ============================================================================
// Tests
// ============================================================================
