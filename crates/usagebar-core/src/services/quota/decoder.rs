//! Usage payload decoding
//!
//! The endpoint answers with a JSON object holding one optional field per
//! limit:
//!
//! ```json
//! {
//!   "five_hour": { "utilization": 42.0, "resets_at": "2025-03-10T17:00:00.123+00:00" },
//!   "seven_day": { "utilization": 18.0, "resets_at": null },
//!   "seven_day_opus": null
//! }
//! ```
//!
//! Known limits must be well formed. Unknown fields are carried through
//! when they look like a limit and ignored otherwise.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::provider::QuotaError;
use super::types::{QuotaLimit, QuotaMetric, QuotaSnapshot};

/// A single limit as it appears on the wire
#[derive(Debug, Deserialize)]
struct WireLimit {
    utilization: f64,
    #[serde(default)]
    resets_at: Option<String>,
}

/// Decode a usage payload into a snapshot stamped with `fetched_at`
pub fn decode(body: &str, fetched_at: DateTime<Utc>) -> Result<QuotaSnapshot, QuotaError> {
    let value: Value = serde_json::from_str(body)?;
    let Value::Object(fields) = value else {
        return Err(QuotaError::Decode(format!(
            "expected a JSON object, got {}",
            json_type(&value)
        )));
    };

    let mut snapshot = QuotaSnapshot::new(fetched_at);

    for (key, value) in fields {
        if value.is_null() {
            continue;
        }

        let metric = QuotaMetric::from_wire_key(&key);
        if metric.is_known() {
            let wire = WireLimit::deserialize(&value)
                .map_err(|e| QuotaError::Decode(format!("invalid `{}`: {}", key, e)))?;
            snapshot.limits.insert(metric, to_limit(&key, wire));
        } else if looks_like_limit(&value) {
            match WireLimit::deserialize(&value) {
                Ok(wire) => {
                    snapshot.limits.insert(metric, to_limit(&key, wire));
                }
                Err(e) => {
                    log::debug!("[quota:decoder] Ignoring unknown field `{}`: {}", key, e);
                }
            }
        } else {
            log::debug!("[quota:decoder] Ignoring non-limit field `{}`", key);
        }
    }

    log::debug!(
        "[quota:decoder] Decoded {} limits ({} known)",
        snapshot.limits.len(),
        snapshot.known().count()
    );
    Ok(snapshot)
}

/// Parse an ISO-8601 reset timestamp; unparseable values become `None`
pub fn parse_reset_time(raw: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            log::warn!("[quota:decoder] Failed to parse resets_at {:?}: {}", raw, e);
            None
        }
    }
}

fn to_limit(key: &str, wire: WireLimit) -> QuotaLimit {
    log::trace!("[quota:decoder] {} utilization={}", key, wire.utilization);
    QuotaLimit {
        utilization: wire.utilization,
        resets_at: wire.resets_at.as_deref().and_then(parse_reset_time),
    }
}

fn looks_like_limit(value: &Value) -> bool {
    value
        .as_object()
        .map(|obj| obj.get("utilization").map(Value::is_number).unwrap_or(false))
        .unwrap_or(false)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// Tests
// ============================================================================
