//! Configuration surface
//!
//! The engine is handed an explicit configuration object; it never reads the
//! process environment on its own. Environment variables are captured once
//! into an [`EnvFallback`] and only consulted for values the explicit
//! configuration leaves unset.
//!
//! The persisted form is a small JSON file:
//!
//! ```json
//! {
//!   "credentials": { "session_key": "sk-ant-...", "organization_id": "0f1e..." },
//!   "display": { "selected_metric": "five_hour", "icon_style": "bar_blocks" }
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::services::quota::provider::QuotaError;
use crate::services::quota::types::{DisplayConfig, IconStyle, NumberStyle, QuotaMetric};

// ============================================================================
// Constants
// ============================================================================

pub const SESSION_KEY_ENV: &str = "CLAUDE_SESSION_KEY";
pub const ORGANIZATION_ID_ENV: &str = "CLAUDE_ORGANIZATION_ID";
pub const METRIC_ENV: &str = "USAGEBAR_METRIC";
pub const NUMBER_STYLE_ENV: &str = "USAGEBAR_NUMBER_STYLE";
pub const ICON_STYLE_ENV: &str = "USAGEBAR_ICON_STYLE";
pub const STATUS_EMOJI_ENV: &str = "USAGEBAR_STATUS_EMOJI";

/// Every variable [`EnvFallback::from_process`] captures
pub const FALLBACK_VARS: [&str; 6] = [
    SESSION_KEY_ENV,
    ORGANIZATION_ID_ENV,
    METRIC_ENV,
    NUMBER_STYLE_ENV,
    ICON_STYLE_ENV,
    STATUS_EMOJI_ENV,
];

/// Directory name under the platform config directory
const APP_DIR: &str = "usagebar";

const CONFIG_FILE: &str = "config.json";

/// Stand-in for secrets in user-facing output
pub const REDACTED: &str = "****";

// ============================================================================
// Environment Fallback
// ============================================================================

/// Environment values captured at startup
///
/// Empty values are treated as unset.
#[derive(Clone, Default, PartialEq)]
pub struct EnvFallback {
    vars: HashMap<String, String>,
}

impl EnvFallback {
    /// Capture the fallback variables from the process environment
    pub fn from_process() -> Self {
        Self::from_pairs(
            FALLBACK_VARS
                .iter()
                .filter_map(|name| std::env::var(name).ok().map(|value| (*name, value))),
        )
    }

    /// Build from explicit pairs (tests, embedding hosts)
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();
        Self { vars }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }
}

impl fmt::Debug for EnvFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.vars.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("EnvFallback").field("set", &names).finish()
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Credentials as configured; either value may be missing
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

impl CredentialConfig {
    pub fn new(session_key: impl Into<String>, organization_id: impl Into<String>) -> Self {
        Self {
            session_key: Some(session_key.into()),
            organization_id: Some(organization_id.into()),
        }
    }
}

impl fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("session_key", &self.session_key.as_ref().map(|_| REDACTED))
            .field("organization_id", &self.organization_id)
            .finish()
    }
}

/// Credentials ready for a request
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub session_key: String,
    pub organization_id: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("session_key", &REDACTED)
            .field("organization_id", &self.organization_id)
            .finish()
    }
}

/// Resolve request credentials: explicit value first, environment second
///
/// Fails with [`QuotaError::MissingCredentials`] naming the first missing
/// value.
pub fn resolve_credentials(
    explicit: &CredentialConfig,
    env: &EnvFallback,
) -> std::result::Result<Credentials, QuotaError> {
    let session_key = pick(explicit.session_key.as_deref(), env.get(SESSION_KEY_ENV))
        .ok_or_else(|| QuotaError::MissingCredentials("No session key configured".to_string()))?;
    let organization_id = pick(explicit.organization_id.as_deref(), env.get(ORGANIZATION_ID_ENV))
        .ok_or_else(|| {
            QuotaError::MissingCredentials("No organization ID configured".to_string())
        })?;

    Ok(Credentials {
        session_key,
        organization_id,
    })
}

fn pick(explicit: Option<&str>, fallback: Option<&str>) -> Option<String> {
    explicit
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| fallback.map(str::trim).filter(|v| !v.is_empty()))
        .map(str::to_string)
}

// ============================================================================
// Display Settings
// ============================================================================

/// Display preferences as persisted; unset values fall back to the
/// environment and then to [`DisplayConfig::default`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_metric: Option<QuotaMetric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_style: Option<NumberStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_style: Option<IconStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_status_emoji: Option<bool>,
}

impl DisplaySettings {
    /// Merge with the environment into a render configuration
    ///
    /// Unparseable environment values are logged and ignored.
    pub fn resolve(&self, env: &EnvFallback) -> DisplayConfig {
        let defaults = DisplayConfig::default();
        DisplayConfig {
            selected_metric: self
                .selected_metric
                .clone()
                .or_else(|| env_parse(env, METRIC_ENV))
                .unwrap_or(defaults.selected_metric),
            number_style: self
                .number_style
                .or_else(|| env_parse(env, NUMBER_STYLE_ENV))
                .unwrap_or(defaults.number_style),
            icon_style: self
                .icon_style
                .or_else(|| env_parse(env, ICON_STYLE_ENV))
                .unwrap_or(defaults.icon_style),
            show_status_emoji: self
                .show_status_emoji
                .or_else(|| env.get(STATUS_EMOJI_ENV).and_then(parse_flag))
                .unwrap_or(defaults.show_status_emoji),
        }
    }
}

fn env_parse<T>(env: &EnvFallback, name: &str) -> Option<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw = env.get(name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("[config] Ignoring {}={:?}: {}", name, raw, e);
            None
        }
    }
}

/// Parse a boolean flag the way shells spell them
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            log::warn!("[config] Ignoring unrecognised flag value {:?}", other);
            None
        }
    }
}

// ============================================================================
// Config File
// ============================================================================

/// Everything a presentation surface supplies to the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    pub credentials: CredentialConfig,
    pub display: DisplaySettings,
}

impl UsageConfig {
    /// `<config_dir>/usagebar/config.json`
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::config("Could not determine the user config directory"))?;
        Ok(dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("[config] No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_json::from_str(&content)?;
        log::debug!("[config] Loaded config from {:?}", path);
        Ok(config)
    }

    /// Write to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        log::info!("[config] Saved config to {:?}", path);
        Ok(())
    }

    pub fn resolve_credentials(
        &self,
        env: &EnvFallback,
    ) -> std::result::Result<Credentials, QuotaError> {
        resolve_credentials(&self.credentials, env)
    }

    pub fn display_config(&self, env: &EnvFallback) -> DisplayConfig {
        self.display.resolve(env)
    }

    /// Set a value by key, as typed on a command line
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key.to_lowercase().as_str() {
            "session_key" => self.credentials.session_key = non_empty(value),
            "organization_id" => self.credentials.organization_id = non_empty(value),
            "metric" | "selected_metric" => {
                let metric: QuotaMetric = value.parse().map_err(Error::Validation)?;
                if !metric.is_selectable() {
                    return Err(Error::validation(format!(
                        "{} cannot be selected for the title (choose one of: {})",
                        metric,
                        selectable_names()
                    )));
                }
                self.display.selected_metric = Some(metric);
            }
            "number_style" => {
                self.display.number_style = Some(value.parse().map_err(Error::Validation)?)
            }
            "icon_style" => self.display.icon_style = Some(value.parse().map_err(Error::Validation)?),
            "show_status_emoji" | "status_emoji" => {
                let flag = parse_flag(value).ok_or_else(|| {
                    Error::validation(format!("Expected true or false, got {:?}", value))
                })?;
                self.display.show_status_emoji = Some(flag);
            }
            _ => {
                return Err(Error::validation(format!(
                    "Unknown config key: {} (available: {})",
                    key,
                    CONFIG_KEYS.join(", ")
                )))
            }
        }
        Ok(())
    }
}

/// Keys accepted by [`UsageConfig::set`]
pub const CONFIG_KEYS: [&str; 6] = [
    "session_key",
    "organization_id",
    "metric",
    "number_style",
    "icon_style",
    "show_status_emoji",
];

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn selectable_names() -> String {
    QuotaMetric::SELECTABLE
        .iter()
        .map(|m| m.wire_key().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// Tests
// ============================================================================
