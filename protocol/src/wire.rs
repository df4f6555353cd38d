//! Lenient field decoders for server payloads.
//!
//! The backend is a Jackson-serialized Spring service, so ids may arrive as
//! numbers, timestamps as ISO strings, epoch numbers or `[y, m, d, h, m, s,
//! nanos]` arrays, and metadata as an embedded JSON string.

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Deserializer;
use serde::de::Error as _;
use serde_json::Value;

use crate::notification::Metadata;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Signed(i64),
    Unsigned(u64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Signed(n) => n.to_string(),
            RawId::Unsigned(n) => n.to_string(),
        }
    }
}

pub(crate) fn id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(String::from)
}

pub(crate) fn opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
}

pub(crate) fn timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse_timestamp(&value).ok_or_else(|| D::Error::custom(format!("invalid timestamp: {value}")))
}

/// Unparseable timestamps decode as `None`; the caller substitutes "now".
pub(crate) fn opt_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(parse_timestamp(&value))
}

pub(crate) fn metadata<'de, D>(deserializer: D) -> Result<Metadata, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(metadata_from_value(value))
}

pub(crate) fn metadata_from_value(value: Value) -> Metadata {
    match value {
        Value::Object(map) => map,
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Object(map)) => map,
            _ => Metadata::new(),
        },
        _ => Metadata::new(),
    }
}

/// Decode any of the timestamp shapes the backend is known to emit.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Some(ts.with_timezone(&Utc));
            }
            s.parse::<NaiveDateTime>().ok().map(|naive| naive.and_utc())
        }
        Value::Number(n) => {
            let raw = n.as_f64()?;
            if raw.abs() >= 1e11 {
                DateTime::from_timestamp_millis(raw as i64)
            } else {
                let secs = raw.trunc() as i64;
                let nanos = ((raw - raw.trunc()) * 1e9).round() as u32;
                DateTime::from_timestamp(secs, nanos)
            }
        }
        Value::Array(parts) => {
            let part = |i: usize| parts.get(i).and_then(Value::as_i64).unwrap_or(0);
            let date = NaiveDate::from_ymd_opt(
                i32::try_from(part(0)).ok()?,
                u32::try_from(part(1)).ok()?,
                u32::try_from(part(2)).ok()?,
            )?;
            let time = date.and_hms_nano_opt(
                u32::try_from(part(3)).ok()?,
                u32::try_from(part(4)).ok()?,
                u32::try_from(part(5)).ok()?,
                u32::try_from(part(6)).ok()?,
            )?;
            Some(time.and_utc())
        }
        _ => None,
    }
}
