//! CLI commands module
//!
//! Contains all CLI command implementations.

pub mod config;
pub mod pace;
pub mod status;
pub mod watch;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::Tabled;

use usagebar_core::services::quota::display::format_reset_time;
use usagebar_core::services::quota::MetricPacing;
use usagebar_core::{ClaudeWebClient, DisplayConfig, EnvFallback, QuotaSnapshot, UsageConfig};

use crate::output::{OutputFormat, percent_cell};

/// Shared context for all commands
pub struct Context {
    pub format: OutputFormat,
    pub quiet: bool,
    pub config_path: PathBuf,
    pub config: UsageConfig,
    pub env: EnvFallback,
    pub base_url: Option<String>,
}

impl Context {
    /// Render preferences: config file, then environment, then defaults
    pub fn display(&self) -> DisplayConfig {
        self.config.display_config(&self.env)
    }

    pub fn client(&self) -> ClaudeWebClient {
        match &self.base_url {
            Some(url) => ClaudeWebClient::with_base_url(url.clone()),
            None => ClaudeWebClient::new(),
        }
    }
}

/// Per-metric row shared by `status` and `pace`
#[derive(Debug, Serialize, Tabled)]
pub struct MetricRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Used")]
    pub used: String,
    #[tabled(rename = "Expected")]
    pub expected: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Resets In")]
    pub resets_in: String,
}

impl MetricRow {
    pub fn from_pacing(pacing: &MetricPacing, now: DateTime<Utc>) -> Self {
        Self {
            metric: pacing.metric.display_name(),
            used: percent_cell(Some(pacing.utilization)),
            expected: percent_cell(pacing.expected),
            status: pacing.status.to_string(),
            resets_in: format_reset_time(pacing.resets_at, now),
        }
    }
}

/// Rows for every known metric in a snapshot
pub fn metric_rows(snapshot: &QuotaSnapshot, now: DateTime<Utc>) -> Vec<MetricRow> {
    snapshot
        .known()
        .map(|(metric, limit)| MetricRow::from_pacing(&MetricPacing::assess(metric, limit, now), now))
        .collect()
}
