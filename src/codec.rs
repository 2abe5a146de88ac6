//! Message value codec (spec.md §4.2): converts typed [`CellValue`]s to the
//! `(data_type, value)` string pair stored on a [`crate::message::Message`],
//! and back.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value as Json;

/// Tagged sum of the seven documented `data_type` variants plus an opaque
/// escape hatch for caller-defined tags (spec.md §9).
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Null,
    Text(String),
    Int(i64),
    Double(f64),
    Bool(bool),
    DateTime(DateTime<Utc>),
    Json(Json),
    /// A caller-defined `data_type` tag paired with its raw string form;
    /// used whenever the producer's type doesn't map onto the documented
    /// variants.
    Tagged(String, String),
}

/// `encode(value) -> (data_type, value_string)`.
#[must_use]
pub fn encode(value: &CellValue) -> (String, String) {
    match value {
        CellValue::Null => ("null".to_string(), String::new()),
        CellValue::Text(s) => ("string".to_string(), s.clone()),
        CellValue::Int(i) => ("int".to_string(), i.to_string()),
        CellValue::Double(f) => ("double".to_string(), encode_double(*f)),
        CellValue::Bool(b) => ("bool".to_string(), if *b { "1" } else { "0" }.to_string()),
        CellValue::DateTime(dt) => (
            "datetime".to_string(),
            dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        ),
        CellValue::Json(j) => ("json".to_string(), j.to_string()),
        CellValue::Tagged(tag, raw) => (tag.clone(), raw.clone()),
    }
}

fn encode_double(f: f64) -> String {
    // Rust's float Display is shortest-round-trip and already spells out
    // "inf"/"-inf"/"NaN", which `f64::from_str` parses back unchanged.
    f.to_string()
}

/// `decode(data_type, value_string) -> CellValue`. Never fails: unparseable
/// input degrades to a documented default rather than propagating an error
/// (spec.md §4.2, §7 item 1).
#[must_use]
pub fn decode(data_type: &str, value: &str) -> CellValue {
    match data_type {
        "null" => CellValue::Null,
        "" if value.is_empty() => CellValue::Null,
        "string" => CellValue::Text(value.to_string()),
        "" => CellValue::Text(value.to_string()),
        "int" => CellValue::Int(value.parse().unwrap_or(0)),
        "double" => CellValue::Double(value.parse().unwrap_or(0.0)),
        "bool" => CellValue::Bool(value == "1" || value.eq_ignore_ascii_case("true")),
        "datetime" => DateTime::parse_from_rfc3339(value)
            .map(|dt| CellValue::DateTime(dt.with_timezone(&Utc)))
            .unwrap_or(CellValue::Null),
        "json" => serde_json::from_str::<Json>(value)
            .map(CellValue::Json)
            .unwrap_or_else(|_| CellValue::Tagged("json".to_string(), value.to_string())),
        other => CellValue::Tagged(other.to_string(), value.to_string()),
    }
}
