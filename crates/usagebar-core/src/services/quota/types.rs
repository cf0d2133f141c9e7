//! Quota tracking types
//!
//! Types for the usage snapshot reported by the remote quota API and the
//! display preferences used to render it.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ============================================================================
// Metric Types
// ============================================================================

/// A named usage limit reported by the quota API
///
/// The API reports a small, fixed set of rolling windows:
/// - a 5-hour window shared by all models
/// - 7-day windows, either for all models or scoped to one model family
///
/// Any other limit-shaped field in the payload is preserved as `Other` so
/// newer metrics are carried through without being rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QuotaMetric {
    /// 5-hour rolling window
    FiveHour,
    /// 7-day rolling window (all models)
    SevenDay,
    /// 7-day rolling window for Sonnet models
    SevenDaySonnet,
    /// 7-day rolling window for Opus models
    SevenDayOpus,
    /// 7-day rolling window for OAuth apps
    SevenDayOauthApps,
    /// Any limit the engine does not render
    Other(String),
}

impl QuotaMetric {
    /// Metrics a user may pick as the headline display metric
    pub const SELECTABLE: [QuotaMetric; 3] = [
        QuotaMetric::FiveHour,
        QuotaMetric::SevenDay,
        QuotaMetric::SevenDaySonnet,
    ];

    /// Map a payload field name to a metric
    pub fn from_wire_key(key: &str) -> Self {
        match key {
            "five_hour" => QuotaMetric::FiveHour,
            "seven_day" => QuotaMetric::SevenDay,
            "seven_day_sonnet" => QuotaMetric::SevenDaySonnet,
            "seven_day_opus" => QuotaMetric::SevenDayOpus,
            "seven_day_oauth_apps" => QuotaMetric::SevenDayOauthApps,
            other => QuotaMetric::Other(other.to_string()),
        }
    }

    /// Payload field name for this metric
    pub fn wire_key(&self) -> &str {
        match self {
            QuotaMetric::FiveHour => "five_hour",
            QuotaMetric::SevenDay => "seven_day",
            QuotaMetric::SevenDaySonnet => "seven_day_sonnet",
            QuotaMetric::SevenDayOpus => "seven_day_opus",
            QuotaMetric::SevenDayOauthApps => "seven_day_oauth_apps",
            QuotaMetric::Other(key) => key,
        }
    }

    /// Whether the metric is one of the engine's known limits
    pub fn is_known(&self) -> bool {
        !matches!(self, QuotaMetric::Other(_))
    }

    /// Whether the metric can be chosen as the headline display metric
    pub fn is_selectable(&self) -> bool {
        Self::SELECTABLE.contains(self)
    }

    /// Length of the rolling window this metric resets on
    ///
    /// Only the 5-hour limit uses a short window; every 7-day limit uses the
    /// same duration regardless of model scoping.
    pub fn window_duration(&self) -> Duration {
        match self {
            QuotaMetric::FiveHour => Duration::hours(5),
            _ => Duration::days(7),
        }
    }

    /// Long label used in listings
    pub fn display_name(&self) -> String {
        match self {
            QuotaMetric::FiveHour => "5-hour Limit".to_string(),
            QuotaMetric::SevenDay => "7-day Limit (All Models)".to_string(),
            QuotaMetric::SevenDaySonnet => "7-day Limit (Sonnet)".to_string(),
            QuotaMetric::SevenDayOpus => "7-day Limit (Opus)".to_string(),
            QuotaMetric::SevenDayOauthApps => "7-day Limit (OAuth Apps)".to_string(),
            QuotaMetric::Other(key) => key.clone(),
        }
    }

    /// Short label used by the widget
    pub fn short_name(&self) -> String {
        match self {
            QuotaMetric::FiveHour => "5-hour Limit".to_string(),
            QuotaMetric::SevenDay => "7-day Limit".to_string(),
            QuotaMetric::SevenDaySonnet => "7-day Sonnet".to_string(),
            QuotaMetric::SevenDayOpus => "7-day Opus".to_string(),
            QuotaMetric::SevenDayOauthApps => "7-day OAuth".to_string(),
            QuotaMetric::Other(key) => key.clone(),
        }
    }
}

impl std::fmt::Display for QuotaMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_key())
    }
}

impl std::str::FromStr for QuotaMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "five_hour" | "5_hour" | "5hour" | "5h" => Ok(QuotaMetric::FiveHour),
            "seven_day" | "7_day" | "7day" | "7d" => Ok(QuotaMetric::SevenDay),
            "seven_day_sonnet" | "7_day_sonnet" | "sonnet" => Ok(QuotaMetric::SevenDaySonnet),
            "seven_day_opus" | "7_day_opus" | "opus" => Ok(QuotaMetric::SevenDayOpus),
            "seven_day_oauth_apps" | "7_day_oauth_apps" | "oauth_apps" => {
                Ok(QuotaMetric::SevenDayOauthApps)
            }
            _ => Err(format!("Unknown metric: {}", s)),
        }
    }
}

impl Serialize for QuotaMetric {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.wire_key())
    }
}

impl<'de> Deserialize<'de> for QuotaMetric {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let key = String::deserialize(deserializer)?;
        // Accept the lenient aliases first, fall back to the raw wire key
        Ok(key
            .parse::<QuotaMetric>()
            .unwrap_or_else(|_| QuotaMetric::from_wire_key(&key)))
    }
}

// ============================================================================
// Snapshot Types
// ============================================================================

/// One metric's reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaLimit {
    /// Percentage of the limit consumed; may exceed 100
    pub utilization: f64,
    /// When the window resets, if the API reported a parseable timestamp
    pub resets_at: Option<DateTime<Utc>>,
}

impl QuotaLimit {
    pub fn new(utilization: f64) -> Self {
        Self {
            utilization,
            resets_at: None,
        }
    }

    /// Set the reset time
    pub fn with_resets_at(mut self, resets_at: DateTime<Utc>) -> Self {
        self.resets_at = Some(resets_at);
        self
    }
}

/// A point-in-time snapshot of every limit the API reported
///
/// A snapshot is replaced wholesale on each successful fetch. A metric
/// missing from `limits` means that limit does not apply to the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub limits: BTreeMap<QuotaMetric, QuotaLimit>,
    /// When this snapshot was decoded
    pub fetched_at: DateTime<Utc>,
}

impl QuotaSnapshot {
    /// Create an empty snapshot stamped with the given time
    pub fn new(fetched_at: DateTime<Utc>) -> Self {
        Self {
            limits: BTreeMap::new(),
            fetched_at,
        }
    }

    /// Add a limit reading
    pub fn with_limit(mut self, metric: QuotaMetric, limit: QuotaLimit) -> Self {
        self.limits.insert(metric, limit);
        self
    }

    pub fn get(&self, metric: &QuotaMetric) -> Option<&QuotaLimit> {
        self.limits.get(metric)
    }

    /// Known metrics in listing order
    pub fn known(&self) -> impl Iterator<Item = (&QuotaMetric, &QuotaLimit)> {
        self.limits.iter().filter(|(metric, _)| metric.is_known())
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }
}

// ============================================================================
// Pacing Status
// ============================================================================

/// How actual consumption compares to linear consumption over the window
///
/// Always derived from a snapshot and the current time; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingStatus {
    OnTrack,
    Borderline,
    Exceeding,
}

impl std::fmt::Display for PacingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacingStatus::OnTrack => write!(f, "on_track"),
            PacingStatus::Borderline => write!(f, "borderline"),
            PacingStatus::Exceeding => write!(f, "exceeding"),
        }
    }
}

// ============================================================================
// Display Styles
// ============================================================================

/// How the numeric part of the title is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberStyle {
    None,
    /// `42%`
    #[default]
    Percentage,
    /// `42|85` (actual|expected)
    Threshold,
}

impl std::fmt::Display for NumberStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NumberStyle::None => write!(f, "none"),
            NumberStyle::Percentage => write!(f, "percentage"),
            NumberStyle::Threshold => write!(f, "threshold"),
        }
    }
}

impl std::str::FromStr for NumberStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "off" => Ok(NumberStyle::None),
            "percentage" | "percent" | "pct" => Ok(NumberStyle::Percentage),
            "threshold" | "threshold_pair" | "pair" => Ok(NumberStyle::Threshold),
            _ => Err(format!("Unknown number style: {}", s)),
        }
    }
}

/// Progress glyph appended to the title
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IconStyle {
    #[default]
    None,
    /// ◕
    Circle,
    /// ⣇
    Braille,
    /// [===  ]
    BarAscii,
    /// ▓▓░░░
    BarBlocks,
    /// ■■□□□
    BarSquares,
    /// ●●○○○
    BarCircles,
    /// ━━───
    BarLines,
}

impl IconStyle {
    pub const ALL: [IconStyle; 8] = [
        IconStyle::None,
        IconStyle::Circle,
        IconStyle::Braille,
        IconStyle::BarAscii,
        IconStyle::BarBlocks,
        IconStyle::BarSquares,
        IconStyle::BarCircles,
        IconStyle::BarLines,
    ];
}

impl std::fmt::Display for IconStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IconStyle::None => "none",
            IconStyle::Circle => "circle",
            IconStyle::Braille => "braille",
            IconStyle::BarAscii => "bar_ascii",
            IconStyle::BarBlocks => "bar_blocks",
            IconStyle::BarSquares => "bar_squares",
            IconStyle::BarCircles => "bar_circles",
            IconStyle::BarLines => "bar_lines",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for IconStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "none" | "off" => Ok(IconStyle::None),
            "circle" => Ok(IconStyle::Circle),
            "braille" => Ok(IconStyle::Braille),
            "bar_ascii" | "ascii" => Ok(IconStyle::BarAscii),
            "bar_blocks" | "blocks" => Ok(IconStyle::BarBlocks),
            "bar_squares" | "squares" => Ok(IconStyle::BarSquares),
            "bar_circles" | "circles" => Ok(IconStyle::BarCircles),
            "bar_lines" | "lines" => Ok(IconStyle::BarLines),
            _ => Err(format!("Unknown icon style: {}", s)),
        }
    }
}

// ============================================================================
// Display Configuration
// ============================================================================

/// Caller-supplied rendering preferences, immutable per render call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub selected_metric: QuotaMetric,
    pub number_style: NumberStyle,
    pub icon_style: IconStyle,
    pub show_status_emoji: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            selected_metric: QuotaMetric::SevenDay,
            number_style: NumberStyle::Percentage,
            icon_style: IconStyle::None,
            show_status_emoji: true,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_wire_keys() {
        assert_eq!(QuotaMetric::from_wire_key("five_hour"), QuotaMetric::FiveHour);
        assert_eq!(
            QuotaMetric::from_wire_key("seven_day_oauth_apps"),
            QuotaMetric::SevenDayOauthApps
        );
        assert_eq!(
            QuotaMetric::from_wire_key("iguana_necktie"),
            QuotaMetric::Other("iguana_necktie".to_string())
        );
        assert_eq!(QuotaMetric::SevenDaySonnet.wire_key(), "seven_day_sonnet");
    }

    #[test]
    fn test_metric_from_str() {
        assert_eq!("5h".parse::<QuotaMetric>().unwrap(), QuotaMetric::FiveHour);
        assert_eq!("7-day".parse::<QuotaMetric>().unwrap(), QuotaMetric::SevenDay);
        assert_eq!("Sonnet".parse::<QuotaMetric>().unwrap(), QuotaMetric::SevenDaySonnet);
        assert!("hourly".parse::<QuotaMetric>().is_err());
    }

    #[test]
    fn test_metric_window_duration() {
        assert_eq!(QuotaMetric::FiveHour.window_duration(), Duration::hours(5));
        assert_eq!(QuotaMetric::SevenDay.window_duration(), Duration::days(7));
        assert_eq!(QuotaMetric::SevenDaySonnet.window_duration(), Duration::days(7));
        assert_eq!(QuotaMetric::SevenDayOpus.window_duration(), Duration::days(7));
    }

    #[test]
    fn test_metric_selectable() {
        assert!(QuotaMetric::FiveHour.is_selectable());
        assert!(QuotaMetric::SevenDaySonnet.is_selectable());
        assert!(!QuotaMetric::SevenDayOpus.is_selectable());
        assert!(!QuotaMetric::Other("x".to_string()).is_known());
    }

    #[test]
    fn test_metric_serde_uses_wire_key() {
        let json = serde_json::to_string(&QuotaMetric::SevenDay).unwrap();
        assert_eq!(json, "\"seven_day\"");

        let metric: QuotaMetric = serde_json::from_str("\"5h\"").unwrap();
        assert_eq!(metric, QuotaMetric::FiveHour);

        let other: QuotaMetric = serde_json::from_str("\"brand_new\"").unwrap();
        assert_eq!(other, QuotaMetric::Other("brand_new".to_string()));
    }

    #[test]
    fn test_snapshot_builder() {
        let now = Utc::now();
        let snapshot = QuotaSnapshot::new(now)
            .with_limit(QuotaMetric::SevenDay, QuotaLimit::new(42.0))
            .with_limit(QuotaMetric::Other("new_limit".to_string()), QuotaLimit::new(1.0));

        assert_eq!(snapshot.get(&QuotaMetric::SevenDay).unwrap().utilization, 42.0);
        assert!(snapshot.get(&QuotaMetric::FiveHour).is_none());
        assert_eq!(snapshot.known().count(), 1);
        assert!(!snapshot.is_empty());
    }

    #[test]
    fn test_display_style_parsing() {
        assert_eq!("pct".parse::<NumberStyle>().unwrap(), NumberStyle::Percentage);
        assert_eq!("threshold".parse::<NumberStyle>().unwrap(), NumberStyle::Threshold);
        assert_eq!("bar-blocks".parse::<IconStyle>().unwrap(), IconStyle::BarBlocks);
        assert_eq!("BRAILLE".parse::<IconStyle>().unwrap(), IconStyle::Braille);
        assert!("sparkline".parse::<IconStyle>().is_err());

        for style in IconStyle::ALL {
            assert_eq!(style.to_string().parse::<IconStyle>().unwrap(), style);
        }
    }

    #[test]
    fn test_display_config_default() {
        let config = DisplayConfig::default();
        assert_eq!(config.selected_metric, QuotaMetric::SevenDay);
        assert_eq!(config.number_style, NumberStyle::Percentage);
        assert_eq!(config.icon_style, IconStyle::None);
        assert!(config.show_status_emoji);
    }

    #[test]
    fn test_display_config_partial_json_uses_defaults() {
        let config: DisplayConfig = serde_json::from_str(r#"{"icon_style": "circle"}"#).unwrap();
        assert_eq!(config.icon_style, IconStyle::Circle);
        assert_eq!(config.selected_metric, QuotaMetric::SevenDay);
        assert!(config.show_status_emoji);
    }
}
