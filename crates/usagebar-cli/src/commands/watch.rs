//! Watch command
//!
//! Keeps the engine running and prints the title whenever a cycle publishes.
//! Reads stdin for manual control: empty line or `r` refreshes, `q` quits.

use std::time::Duration;

use anyhow::Result;
use chrono::{Local, Utc};
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use usagebar_core::services::quota::engine::MIN_POLL_INTERVAL;
use usagebar_core::{
    CredentialConfig, EngineEvent, EngineHandle, PollingConfig, PollingEngine, UsageConfig,
    WidgetPhase, WidgetState,
};

use super::Context;
use crate::output::{paint, print_error, print_info, print_notice};

#[derive(Args)]
pub struct WatchArgs {
    /// Seconds between scheduled fetches
    #[arg(long, short, default_value = "30")]
    pub interval: u64,
}

pub async fn execute(ctx: &Context, args: WatchArgs) -> Result<()> {
    let config = PollingConfig {
        poll_interval: Duration::from_secs(args.interval),
        ..PollingConfig::default()
    }
    .validate();
    if config.poll_interval > Duration::from_secs(args.interval) {
        print_notice(
            &format!("Interval raised to the minimum of {}s", MIN_POLL_INTERVAL.as_secs()),
            ctx.quiet,
        );
    }

    let display = ctx.display();
    let mut handle = PollingEngine::new(ctx.client(), ctx.config.credentials.clone(), ctx.env.clone())
        .with_config(config)
        .spawn();
    let mut events = handle.subscribe();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut credentials = ctx.config.credentials.clone();

    print_info(
        "Watching usage. Enter refreshes, q quits, Ctrl+C stops.",
        ctx.quiet,
    );

    loop {
        tokio::select! {
            state = handle.next_state() => {
                let Some(state) = state else { break };
                let now = Utc::now();
                let title = state.title(&display, now);
                let stamp = Local::now().format("%H:%M:%S");
                match state.state(&display.selected_metric, now) {
                    WidgetState::Ok(view) => {
                        println!("[{}] {}  {}", stamp, paint(&title, view.status), view.message)
                    }
                    _ => println!("[{}] {}", stamp, title),
                }
                if state.phase == WidgetPhase::Ok && state.is_failing() {
                    print_error(&format!(
                        "{} consecutive failed cycles, showing last good data",
                        state.consecutive_failures
                    ));
                }
            }
            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => match line.trim() {
                        "" | "r" | "refresh" => {
                            refresh(ctx, &handle, &mut credentials);
                        }
                        "q" | "quit" => break,
                        other => print_notice(&format!("Unknown input: {}", other), ctx.quiet),
                    },
                    // stdin closed; keep polling until Ctrl+C
                    Ok(None) | Err(_) => stdin_open = false,
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => report_event(&event, ctx.quiet),
                    Err(RecvError::Lagged(n)) => log::debug!("[watch] Skipped {} events", n),
                    Err(RecvError::Closed) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown().await;
    Ok(())
}

/// Manual refresh; picks up credentials edited since the last read
fn refresh(ctx: &Context, handle: &EngineHandle, credentials: &mut CredentialConfig) {
    match UsageConfig::load_from(&ctx.config_path) {
        Ok(config) if config.credentials != *credentials => {
            log::info!("[watch] Credentials changed on disk, restarting cycle");
            *credentials = config.credentials.clone();
            handle.credentials_changed(config.credentials);
        }
        Ok(_) => {
            handle.refresh();
        }
        Err(e) => {
            print_error(&format!("Could not reload config: {}", e));
            handle.refresh();
        }
    }
}

fn report_event(event: &EngineEvent, quiet: bool) {
    match event {
        EngineEvent::RetryScheduled { attempt, delay } => print_notice(
            &format!("Retry {} in {}s", attempt, delay.as_secs()),
            quiet,
        ),
        EngineEvent::FetchFailed { error, .. } => print_notice(&error.to_string(), quiet),
        EngineEvent::SessionExpired { .. } => print_error(
            "Session expired. Update it with `usagebar config set session_key <key>`, then press Enter",
        ),
        EngineEvent::CredentialsMissing { error, .. } => print_error(&error.to_string()),
        _ => {}
    }
}
