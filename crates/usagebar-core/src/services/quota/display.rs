//! Display formatting
//!
//! Renders pacing figures into short strings for space-constrained
//! surfaces (menu bar titles, status lines, tray tooltips).
//!
//! A title is assembled from up to three parts, joined by a space:
//!
//! ```text
//! [status emoji] [number block] [progress icon]
//!      ✳️             42%           ▓▓░░░
//! ```
//!
//! If every part is disabled the title falls back to the plain percentage,
//! so a rendered title is never blank.

use chrono::{DateTime, Utc};

use super::pacing::{is_limit_reached, MetricPacing};
use super::types::{
    DisplayConfig, IconStyle, NumberStyle, PacingStatus, QuotaLimit, QuotaMetric, QuotaSnapshot,
};

// ============================================================================
// Constants
// ============================================================================

/// Title shown before the first fetch completes
pub const TITLE_LOADING: &str = "⏱️";

/// Title shown when credentials are missing or the selected metric is absent
pub const TITLE_ERROR: &str = "❌";

/// Title shown when the session credential was rejected
pub const TITLE_SESSION_EXPIRED: &str = "🔑";

/// Segments in every progress bar style
pub const PROGRESS_BAR_SEGMENTS: usize = 5;

// ============================================================================
// Numbers
// ============================================================================

/// Round to the nearest integer percentage, halves away from zero
pub fn format_utilization(value: f64) -> String {
    format!("{}", value.round() as i64)
}

fn number_block(utilization: f64, expected: Option<f64>, style: NumberStyle) -> Option<String> {
    match style {
        NumberStyle::None => None,
        NumberStyle::Percentage => Some(format!("{}%", format_utilization(utilization))),
        NumberStyle::Threshold => {
            let expected = expected
                .map(format_utilization)
                .unwrap_or_else(|| "?".to_string());
            Some(format!("{}|{}", format_utilization(utilization), expected))
        }
    }
}

// ============================================================================
// Icons
// ============================================================================

/// Three-way status glyph
pub fn status_icon(status: PacingStatus) -> &'static str {
    match status {
        PacingStatus::OnTrack => "✳️",
        PacingStatus::Borderline => "🚀",
        PacingStatus::Exceeding => "⚠️",
    }
}

/// Five-step pie glyph: ○ ◔ ◑ ◕ ●
pub fn circle_icon(utilization: f64) -> &'static str {
    if utilization < 12.5 {
        "○"
    } else if utilization < 37.5 {
        "◔"
    } else if utilization < 62.5 {
        "◑"
    } else if utilization < 87.5 {
        "◕"
    } else {
        "●"
    }
}

/// Eight-step braille column: ⠀ ⠁ ⠃ ⠇ ⡇ ⣇ ⣧ ⣿
pub fn braille_icon(utilization: f64) -> &'static str {
    const GLYPHS: [&str; 8] = ["⠀", "⠁", "⠃", "⠇", "⡇", "⣇", "⣧", "⣿"];
    let bucket = (utilization / 12.5).floor().clamp(0.0, 7.0) as usize;
    GLYPHS[bucket]
}

/// Number of filled segments in a five-segment bar
pub fn filled_segments(utilization: f64) -> usize {
    let segments = PROGRESS_BAR_SEGMENTS as f64;
    (utilization / 100.0 * segments).round().clamp(0.0, segments) as usize
}

/// Five-segment progress bar
pub fn progress_bar(utilization: f64, filled: &str, empty: &str, prefix: &str, suffix: &str) -> String {
    let filled_count = filled_segments(utilization);
    format!(
        "{}{}{}{}",
        prefix,
        filled.repeat(filled_count),
        empty.repeat(PROGRESS_BAR_SEGMENTS - filled_count),
        suffix
    )
}

/// Progress glyph for a style, `None` when the style is disabled
pub fn progress_icon(utilization: f64, style: IconStyle) -> Option<String> {
    let icon = match style {
        IconStyle::None => return None,
        IconStyle::Circle => circle_icon(utilization).to_string(),
        IconStyle::Braille => braille_icon(utilization).to_string(),
        IconStyle::BarAscii => progress_bar(utilization, "=", " ", "[", "]"),
        IconStyle::BarBlocks => progress_bar(utilization, "▓", "░", "", ""),
        IconStyle::BarSquares => progress_bar(utilization, "■", "□", "", ""),
        IconStyle::BarCircles => progress_bar(utilization, "●", "○", "", ""),
        IconStyle::BarLines => progress_bar(utilization, "━", "─", "", ""),
    };
    Some(icon)
}

// ============================================================================
// Title
// ============================================================================

/// Compose the title for one metric reading
pub fn render(
    utilization: f64,
    expected: Option<f64>,
    status: PacingStatus,
    config: &DisplayConfig,
) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(3);

    if config.show_status_emoji {
        parts.push(status_icon(status).to_string());
    }
    if let Some(number) = number_block(utilization, expected, config.number_style) {
        parts.push(number);
    }
    if let Some(icon) = progress_icon(utilization, config.icon_style) {
        parts.push(icon);
    }

    if parts.is_empty() {
        parts.push(format!("{}%", format_utilization(utilization)));
    }

    parts.join(" ")
}

/// Compose the title for assessed pacing figures
pub fn render_pacing(pacing: &MetricPacing, config: &DisplayConfig) -> String {
    render(pacing.utilization, pacing.expected, pacing.status, config)
}

/// Compose the title for the configured metric of a snapshot
///
/// Returns `None` when the snapshot does not carry the selected metric.
pub fn render_snapshot(
    snapshot: &QuotaSnapshot,
    config: &DisplayConfig,
    now: DateTime<Utc>,
) -> Option<String> {
    let limit = snapshot.get(&config.selected_metric)?;
    let pacing = MetricPacing::assess(&config.selected_metric, limit, now);
    Some(render_pacing(&pacing, config))
}

// ============================================================================
// Copy
// ============================================================================

/// Time until reset in words: `2 days`, `3h 5m`, `4h`, `12m`, `< 1m`, `soon`
pub fn format_reset_time(resets_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(resets_at) = resets_at else {
        return "unknown".to_string();
    };

    let seconds = (resets_at - now).num_seconds();
    if seconds < 0 {
        return "soon".to_string();
    }

    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;

    if hours >= 24 {
        let days = hours / 24;
        format!("{} day{}", days, if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        if minutes > 0 {
            format!("{}h {}m", hours, minutes)
        } else {
            format!("{}h", hours)
        }
    } else if minutes > 0 {
        format!("{}m", minutes)
    } else {
        "< 1m".to_string()
    }
}

/// Secondary line for a metric: `<expected>%, <time to reset>`
pub fn metric_detail(metric: &QuotaMetric, limit: &QuotaLimit, now: DateTime<Utc>) -> String {
    if limit.resets_at.is_none() {
        return "?%, —".to_string();
    }
    let pacing = MetricPacing::assess(metric, limit, now);
    let expected = pacing
        .expected
        .map(format_utilization)
        .unwrap_or_else(|| "?".to_string());
    format!("{}%, {}", expected, format_reset_time(limit.resets_at, now))
}

/// One-line advice for a reading
///
/// The limit-reached rule is checked before the pacing status.
pub fn status_message(utilization: f64, status: PacingStatus) -> &'static str {
    if is_limit_reached(utilization) {
        return "Limit reached — wait for reset";
    }
    match status {
        PacingStatus::OnTrack if utilization < 30.0 => "Plenty of room",
        PacingStatus::OnTrack => "On track — you're good",
        PacingStatus::Borderline => "On pace — be mindful",
        PacingStatus::Exceeding if utilization >= 90.0 => "Almost out — slow down",
        PacingStatus::Exceeding => "Above pace — slow down",
    }
}

// ============================================================================
// Tests
// ============================================================================
