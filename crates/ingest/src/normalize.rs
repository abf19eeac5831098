//! Feed notice normalization.
//!
//! Raw notices arrive as JSON keyed by feed topic. This module turns
//! them into [`Alert`] records, absorbing per-observatory schema quirks
//! so nothing downstream has to know which feed a trigger came from.

use chrono::{DateTime, Utc};
use nova_core::{Alert, AlertId, EventKind, SkyPosition};
use serde_json::Value;
use thiserror::Error;

use crate::RawNotice;

/// Positional uncertainty assumed when a notice omits it.
const DEFAULT_POSITION_ERROR_DEG: f64 = 0.1;

#[derive(Debug, Error)]
pub enum ParseError {
    /// Payload is not valid JSON.
    #[error("notice payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A required field is missing or has the wrong shape.
    #[error("notice field `{0}` is missing or malformed")]
    Field(&'static str),
    /// A timestamp field did not parse as RFC 3339.
    #[error("unrecognized timestamp `{0}`")]
    Timestamp(String),
}

/// Event class implied by the feed topic the notice arrived on.
pub fn kind_for_topic(topic: &str) -> EventKind {
    if topic.contains("einstein_probe") {
        EventKind::FastXrayTransient
    } else if topic.contains("swift") || topic.contains("fermi") || topic.contains("grb") {
        EventKind::GammaRayBurst
    } else if topic.contains("igwn") || topic.contains("lvc") {
        EventKind::GravitationalWave
    } else if topic.contains("tns") || topic.contains("supernova") {
        EventKind::SupernovaCandidate
    } else {
        EventKind::Unknown
    }
}

/// Normalize one raw notice into an alert.
pub fn parse_notice(notice: &RawNotice) -> Result<Alert, ParseError> {
    let record: Value = serde_json::from_slice(&notice.payload)?;

    let id = parse_trigger_id(&record)?;
    let ra_deg = field_f64(&record, "ra")?;
    let dec_deg = field_f64(&record, "dec")?;
    let error_deg = record
        .get("ra_dec_error")
        .and_then(Value::as_f64)
        .unwrap_or(DEFAULT_POSITION_ERROR_DEG);
    let event_time = parse_time(field_str(&record, "trigger_time")?)?;

    // Image SNR is optional in the upstream schema.
    let significance = record.get("image_snr").and_then(Value::as_f64);

    // Absent means the observatory still believes the event is real.
    let astrophysical = record
        .get("astrophysical")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    let expires_at = match record.get("expires_at").and_then(Value::as_str) {
        Some(s) => Some(parse_time(s)?),
        None => None,
    };

    Ok(Alert {
        id,
        kind: kind_for_topic(&notice.topic),
        position: SkyPosition::new(ra_deg, dec_deg, error_deg),
        event_time,
        received_at: notice.received_at,
        significance,
        astrophysical,
        expires_at,
        duplicate_of: None,
    })
}

/// Extract the trigger id, which some feeds wrap in a one-element list
/// and report as either a string or a bare number.
fn parse_trigger_id(record: &Value) -> Result<AlertId, ParseError> {
    let raw = record.get("id").ok_or(ParseError::Field("id"))?;
    let scalar = match raw {
        Value::Array(items) => items.first().ok_or(ParseError::Field("id"))?,
        other => other,
    };
    match scalar {
        Value::String(s) if !s.is_empty() => Ok(AlertId::new(s.clone())),
        Value::Number(n) => Ok(AlertId::new(n.to_string())),
        _ => Err(ParseError::Field("id")),
    }
}

fn field_f64(record: &Value, name: &'static str) -> Result<f64, ParseError> {
    record
        .get(name)
        .and_then(Value::as_f64)
        .ok_or(ParseError::Field(name))
}

fn field_str<'a>(record: &'a Value, name: &'static str) -> Result<&'a str, ParseError> {
    record
        .get(name)
        .and_then(Value::as_str)
        .ok_or(ParseError::Field(name))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, ParseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ParseError::Timestamp(s.to_string()))
}
