//! Point model shared by every pipeline stage.
//!
//! A [`Point`] is one observed (or synthesized) measurement. Its field is a
//! [`FieldValue`], so a point always carries exactly one of a numeric value
//! or a text value. Points serialize to the JSON shape the time-series store
//! client accepts:
//!
//! ```json
//! {"measurement": "Ac.L1.Power",
//!  "tags": {"path": "grid", "instanceNumber": "30", "portalId": "abc"},
//!  "time": "2024-05-01T12:00:00Z",
//!  "fields": {"value": 100.0}}
//! ```

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, Serializer};
use std::fmt::{self, Display, Formatter};

/// A raw `(topic, payload)` event as delivered by the subscription transport.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Identity of the physical device/instance a signal belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tags {
    pub source_id: String,
    pub device_path: String,
    pub instance_number: String,
}

/// The single field a point carries.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldValue {
    Value(f64),
    Text(String),
}

/// One measurement record.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// Dot-joined signal path below the device root, e.g. `Ac.L1.Power`
    pub series_name: String,
    pub tags: Tags,
    /// Observation time, second resolution
    pub timestamp: DateTime<Utc>,
    pub field: FieldValue,
}

/// Identity of one logical time series within a flush window.
///
/// Rendered as `series.path.source.instance`, which is also the string the
/// passthrough patterns are matched against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey(String);

impl SeriesKey {
    pub fn new(series_name: &str, tags: &Tags) -> Self {
        Self(format!(
            "{}.{}.{}.{}",
            series_name, tags.device_path, tags.source_id, tags.instance_number
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the key contains `pattern` as a plain substring.
    pub fn contains(&self, pattern: &str) -> bool {
        self.0.contains(pattern)
    }
}

impl Display for SeriesKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Point {
    pub fn numeric(series_name: impl Into<String>, tags: Tags, timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            series_name: series_name.into(),
            tags,
            timestamp,
            field: FieldValue::Value(value),
        }
    }

    pub fn text(series_name: impl Into<String>, tags: Tags, timestamp: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self {
            series_name: series_name.into(),
            tags,
            timestamp,
            field: FieldValue::Text(text.into()),
        }
    }

    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(&self.series_name, &self.tags)
    }

    /// Numeric value, `None` for text points.
    pub fn value(&self) -> Option<f64> {
        match self.field {
            FieldValue::Value(v) => Some(v),
            FieldValue::Text(_) => None,
        }
    }

    /// RFC3339 UTC timestamp with second precision.
    pub fn time_string(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Encodes the point as one InfluxDB line-protocol line with a
    /// seconds-precision timestamp.
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape_measurement(&self.series_name);
        for (key, value) in [
            ("instanceNumber", &self.tags.instance_number),
            ("path", &self.tags.device_path),
            ("portalId", &self.tags.source_id),
        ] {
            // Empty tag values are not valid line protocol.
            if value.is_empty() {
                continue;
            }
            line.push(',');
            line.push_str(key);
            line.push('=');
            line.push_str(&escape_tag(value));
        }
        line.push(' ');
        match &self.field {
            FieldValue::Value(v) => {
                line.push_str("value=");
                line.push_str(&format_float(*v));
            }
            FieldValue::Text(t) => {
                line.push_str("text=\"");
                line.push_str(&escape_text(t));
                line.push('"');
            }
        }
        line.push(' ');
        line.push_str(&self.timestamp.timestamp().to_string());
        line
    }
}

impl Serialize for Point {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(serde::Serialize)]
        struct WireTags<'a> {
            path: &'a str,
            #[serde(rename = "instanceNumber")]
            instance_number: &'a str,
            #[serde(rename = "portalId")]
            portal_id: &'a str,
        }

        #[derive(serde::Serialize)]
        struct WirePoint<'a> {
            measurement: &'a str,
            tags: WireTags<'a>,
            time: String,
            fields: &'a FieldValue,
        }

        WirePoint {
            measurement: &self.series_name,
            tags: WireTags {
                path: &self.tags.device_path,
                instance_number: &self.tags.instance_number,
                portal_id: &self.tags.source_id,
            },
            time: self.time_string(),
            fields: &self.field,
        }
        .serialize(serializer)
    }
}

fn escape_measurement(s: &str) -> String {
    escape(s, &[',', ' '])
}

fn escape_tag(s: &str) -> String {
    escape(s, &[',', '=', ' '])
}

fn escape_text(s: &str) -> String {
    escape(s, &['"'])
}

/// Backslash-escapes `special` and backslash itself. Line breaks are written
/// as `\n` and `\r` so a value never splits the line.
fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c if c == '\\' || special.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

fn format_float(v: f64) -> String {
    // Whole numbers keep a decimal point.
    if v.fract() == 0.0 && v.is_finite() && v.abs() < 1e15 {
        format!("{:.1}", v)
    } else {
        v.to_string()
    }
}
