//! Config commands
//!
//! Commands for managing the config file.

use anyhow::{bail, Result};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use usagebar_core::config::{
    parse_flag, CONFIG_KEYS, ICON_STYLE_ENV, METRIC_ENV, NUMBER_STYLE_ENV, ORGANIZATION_ID_ENV,
    REDACTED, SESSION_KEY_ENV, STATUS_EMOJI_ENV,
};
use usagebar_core::{IconStyle, NumberStyle, QuotaMetric};

use super::Context;
use crate::output::{print_info, print_json, print_output, print_success, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,

        /// Configuration value
        value: String,
    },

    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// Print the config file path
    Path,
}

/// Config row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct ConfigRow {
    #[tabled(rename = "Key")]
    pub key: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Source")]
    pub source: String,
}

pub async fn execute(ctx: &Context, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => show_config(ctx),
        ConfigAction::Set { key, value } => set_config(ctx, key, value),
        ConfigAction::Get { key } => get_config(ctx, key),
        ConfigAction::Path => {
            println!("{}", ctx.config_path.display());
            Ok(())
        }
    }
}

fn show_config(ctx: &Context) -> Result<()> {
    let rows = get_all_config(ctx);
    print_output(&rows, ctx.format)?;
    Ok(())
}

fn get_config(ctx: &Context, key: String) -> Result<()> {
    let rows = get_all_config(ctx);

    let Some(row) = rows.iter().find(|r| r.key.eq_ignore_ascii_case(key.trim())) else {
        bail!(
            "Config key not found: {} (available: {})",
            key,
            CONFIG_KEYS.join(", ")
        );
    };

    match ctx.format {
        OutputFormat::Json => print_json(row)?,
        OutputFormat::Table => println!("{} = {}", row.key, row.value),
    }
    Ok(())
}

fn set_config(ctx: &Context, key: String, value: String) -> Result<()> {
    let mut config = ctx.config.clone();
    config.set(&key, &value)?;
    config.save_to(&ctx.config_path)?;

    let key = key.to_lowercase();
    let shown = if key == "session_key" { REDACTED } else { value.as_str() };
    print_success(&format!("Set {} = {}", key, shown), ctx.quiet);
    print_info(&format!("Saved to {}", ctx.config_path.display()), ctx.quiet);
    Ok(())
}

fn get_all_config(ctx: &Context) -> Vec<ConfigRow> {
    let file = &ctx.config;
    let resolved = ctx.display();

    let session_key = source_of(
        ctx,
        file.credentials.session_key.is_some(),
        SESSION_KEY_ENV,
        |_| true,
    );
    let organization_id = source_of(
        ctx,
        file.credentials.organization_id.is_some(),
        ORGANIZATION_ID_ENV,
        |_| true,
    );
    let organization_value = file
        .credentials
        .organization_id
        .clone()
        .or_else(|| ctx.env.get(ORGANIZATION_ID_ENV).map(str::to_string));

    vec![
        ConfigRow {
            key: "session_key".to_string(),
            value: if session_key == "default" {
                "Not set".to_string()
            } else {
                REDACTED.to_string()
            },
            source: session_key.to_string(),
        },
        ConfigRow {
            key: "organization_id".to_string(),
            value: organization_value.unwrap_or_else(|| "Not set".to_string()),
            source: organization_id.to_string(),
        },
        ConfigRow {
            key: "metric".to_string(),
            value: resolved.selected_metric.to_string(),
            source: source_of(ctx, file.display.selected_metric.is_some(), METRIC_ENV, |raw| {
                raw.parse::<QuotaMetric>().is_ok()
            })
            .to_string(),
        },
        ConfigRow {
            key: "number_style".to_string(),
            value: resolved.number_style.to_string(),
            source: source_of(ctx, file.display.number_style.is_some(), NUMBER_STYLE_ENV, |raw| {
                raw.parse::<NumberStyle>().is_ok()
            })
            .to_string(),
        },
        ConfigRow {
            key: "icon_style".to_string(),
            value: resolved.icon_style.to_string(),
            source: source_of(ctx, file.display.icon_style.is_some(), ICON_STYLE_ENV, |raw| {
                raw.parse::<IconStyle>().is_ok()
            })
            .to_string(),
        },
        ConfigRow {
            key: "show_status_emoji".to_string(),
            value: resolved.show_status_emoji.to_string(),
            source: source_of(
                ctx,
                file.display.show_status_emoji.is_some(),
                STATUS_EMOJI_ENV,
                |raw| parse_flag(raw).is_some(),
            )
            .to_string(),
        },
    ]
}

/// Where a value came from; an environment value that does not parse
/// falls through to the default, so it is reported as one
fn source_of(
    ctx: &Context,
    in_file: bool,
    env_var: &str,
    accepts: impl Fn(&str) -> bool,
) -> &'static str {
    if in_file {
        "file"
    } else if ctx.env.get(env_var).is_some_and(accepts) {
        "env"
    } else {
        "default"
    }
}
