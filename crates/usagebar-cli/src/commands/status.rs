//! Status command
//!
//! Runs a single polling cycle and reports pacing for every metric.

use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use serde::Serialize;

use usagebar_core::services::quota::{Health, WidgetSnapshot};
use usagebar_core::{PollingEngine, WidgetPhase, WidgetState};

use super::{metric_rows, Context, MetricRow};
use crate::output::{paint, print_info, print_json, print_output, OutputFormat};

/// JSON shape of `usagebar status`
#[derive(Debug, Serialize)]
struct StatusReport {
    title: String,
    state: WidgetState,
    health: Health,
    consecutive_failures: u32,
    metrics: Vec<MetricRow>,
}

pub async fn execute(ctx: &Context) -> Result<()> {
    // Fail fast instead of spinning up the engine without credentials
    if let Err(e) = ctx.config.resolve_credentials(&ctx.env) {
        bail!(
            "{}. Run `usagebar config set session_key <key>` and `usagebar config set organization_id <id>`",
            e
        );
    }

    print_info("Fetching usage...", ctx.quiet || ctx.format == OutputFormat::Json);

    let mut handle = PollingEngine::new(ctx.client(), ctx.config.credentials.clone(), ctx.env.clone())
        .spawn();
    let state = first_settled_state(&mut handle).await;
    handle.shutdown().await;

    let Some(state) = state else {
        bail!("Polling engine stopped before reporting usage");
    };

    match state.phase {
        WidgetPhase::Ok => report(ctx, &state),
        WidgetPhase::SessionExpired => bail!(
            "{}. Update the session key with `usagebar config set session_key <key>`",
            describe_error(&state)
        ),
        WidgetPhase::NeedsSetup | WidgetPhase::Loading => bail!("{}", describe_error(&state)),
    }
}

/// Wait until a cycle has produced data or given up
async fn first_settled_state(
    handle: &mut usagebar_core::EngineHandle,
) -> Option<Arc<WidgetSnapshot>> {
    loop {
        let state = handle.next_state().await?;
        if state.phase != WidgetPhase::Loading || state.consecutive_failures > 0 {
            return Some(state);
        }
    }
}

fn describe_error(state: &WidgetSnapshot) -> String {
    state
        .last_error
        .as_ref()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "Usage unavailable".to_string())
}

fn report(ctx: &Context, state: &WidgetSnapshot) -> Result<()> {
    let now = Utc::now();
    let display = ctx.display();
    let title = state.title(&display, now);
    let view = state.state(&display.selected_metric, now);
    let rows = state
        .snapshot
        .as_deref()
        .map(|snapshot| metric_rows(snapshot, now))
        .unwrap_or_default();

    match ctx.format {
        OutputFormat::Json => print_json(&StatusReport {
            title,
            state: view,
            health: state.health,
            consecutive_failures: state.consecutive_failures,
            metrics: rows,
        }),
        OutputFormat::Table => {
            match &view {
                WidgetState::Ok(view) => {
                    println!("{}  {}", paint(&title, view.status), view.message);
                }
                _ => println!("{}", title),
            }
            print_output(&rows, ctx.format)
        }
    }
}
