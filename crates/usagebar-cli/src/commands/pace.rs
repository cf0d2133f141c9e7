//! Pace command
//!
//! Offline pacing calculator: classify a reading without fetching.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use usagebar_core::services::quota::display::{render_pacing, status_message};
use usagebar_core::services::quota::pacing::effective_status;
use usagebar_core::services::quota::MetricPacing;
use usagebar_core::{QuotaLimit, QuotaMetric};

use super::Context;
use crate::output::{percent_cell, print_single};

#[derive(Args)]
pub struct PaceArgs {
    /// Metric: five_hour, seven_day, seven_day_sonnet, seven_day_opus
    #[arg(long, short)]
    pub metric: Option<String>,

    /// Utilization percentage (0-100)
    #[arg(long, short)]
    pub utilization: f64,

    /// Minutes until the window resets
    #[arg(long, conflicts_with = "resets_at")]
    pub resets_in_minutes: Option<i64>,

    /// Reset time (RFC 3339)
    #[arg(long)]
    pub resets_at: Option<String>,
}

#[derive(Debug, Serialize, Tabled)]
struct PaceRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Used")]
    used: String,
    #[tabled(rename = "Expected")]
    expected: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Advice")]
    advice: String,
}

pub async fn execute(ctx: &Context, args: PaceArgs) -> Result<()> {
    let display = ctx.display();
    let metric = match args.metric.as_deref() {
        Some(raw) => raw.parse::<QuotaMetric>().map_err(anyhow::Error::msg)?,
        None => display.selected_metric.clone(),
    };
    if !args.utilization.is_finite() || args.utilization < 0.0 {
        bail!("Utilization must be a non-negative number, got {}", args.utilization);
    }

    let now = Utc::now();
    let resets_at = resets_at(&args, now)?;

    let mut limit = QuotaLimit::new(args.utilization);
    limit.resets_at = resets_at;
    let pacing = MetricPacing::assess(&metric, &limit, now);

    let row = PaceRow {
        metric: metric.display_name(),
        used: percent_cell(Some(pacing.utilization)),
        expected: percent_cell(pacing.expected),
        status: effective_status(pacing.utilization, pacing.status).to_string(),
        title: render_pacing(&pacing, &display),
        advice: status_message(pacing.utilization, pacing.status).to_string(),
    };
    print_single(&row, ctx.format)
}

fn resets_at(args: &PaceArgs, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    if let Some(minutes) = args.resets_in_minutes {
        let Some(resets_at) =
            Duration::try_minutes(minutes).and_then(|offset| now.checked_add_signed(offset))
        else {
            bail!("Reset offset out of range: {} minutes", minutes);
        };
        return Ok(Some(resets_at));
    }
    match args.resets_at.as_deref() {
        Some(raw) => {
            let parsed = DateTime::parse_from_rfc3339(raw)
                .map_err(|e| anyhow::anyhow!("Invalid reset time {:?}: {}", raw, e))?;
            Ok(Some(parsed.with_timezone(&Utc)))
        }
        None => Ok(None),
    }
}
