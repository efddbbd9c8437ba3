//! Turns raw `(topic, payload)` events into typed [`Point`]s.
//!
//! Topics look like `N/<source id>/<device path>/<instance>/<signal path...>`.
//! The first four segments form the envelope the tags are read from, the
//! rest is joined with `.` into the series name. The payload is a JSON object
//! whose `value` key carries the sample.

use crate::point::{Point, Tags};
use crate::stats::PipelineStats;
use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

const ENVELOPE_SEGMENTS: usize = 4;

/// A parsed payload value.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleValue {
    Numeric(f64),
    Text(String),
    /// Anything the store cannot take; the label names the JSON type.
    Unsupported(&'static str),
}

impl SampleValue {
    /// Classifies a JSON value. Booleans become 1.0/0.0 only when
    /// `accept_booleans` is set.
    pub fn classify(value: &Value, accept_booleans: bool) -> Self {
        match value {
            Value::Number(n) => match n.as_f64() {
                Some(v) => SampleValue::Numeric(v),
                None => SampleValue::Unsupported("number"),
            },
            Value::String(s) => SampleValue::Text(s.clone()),
            Value::Bool(b) if accept_booleans => SampleValue::Numeric(if *b { 1.0 } else { 0.0 }),
            Value::Bool(_) => SampleValue::Unsupported("boolean"),
            Value::Null => SampleValue::Unsupported("null"),
            Value::Array(_) => SampleValue::Unsupported("array"),
            Value::Object(_) => SampleValue::Unsupported("object"),
        }
    }

    /// Extracts and classifies the `value` key of a raw payload.
    pub fn from_payload(payload: &[u8], accept_booleans: bool) -> Self {
        match serde_json::from_slice::<Value>(payload) {
            Ok(Value::Object(map)) => match map.get("value") {
                Some(v) => Self::classify(v, accept_booleans),
                None => SampleValue::Unsupported("missing value"),
            },
            Ok(_) => SampleValue::Unsupported("non-object payload"),
            Err(_) => SampleValue::Unsupported("malformed payload"),
        }
    }
}

/// Stateful normalizer. The only state is the set of topics whose discard
/// has already been reported at info level.
pub struct PointNormalizer {
    accept_booleans: bool,
    stats: Arc<PipelineStats>,
    reported: HashSet<String>,
}

impl PointNormalizer {
    pub fn new(accept_booleans: bool, stats: Arc<PipelineStats>) -> Self {
        Self {
            accept_booleans,
            stats,
            reported: HashSet::new(),
        }
    }

    /// Normalizes an event observed now.
    pub fn normalize(&mut self, topic: &str, payload: &[u8]) -> Option<Point> {
        self.normalize_at(topic, payload, Utc::now())
    }

    /// Normalizes an event observed at `observed_at`, truncated to seconds.
    /// Returns `None` when the event is discarded.
    pub fn normalize_at(&mut self, topic: &str, payload: &[u8], observed_at: DateTime<Utc>) -> Option<Point> {
        let segments: Vec<&str> = topic.split('/').collect();
        if segments.len() <= ENVELOPE_SEGMENTS {
            self.discard(topic, "short topic");
            return None;
        }

        let path = &segments[ENVELOPE_SEGMENTS..];
        if path.iter().all(|s| s.is_empty()) {
            self.discard(topic, "empty signal path");
            return None;
        }

        let sample = SampleValue::from_payload(payload, self.accept_booleans);
        let tags = Tags {
            source_id: segments[1].to_string(),
            device_path: segments[2].to_string(),
            instance_number: segments[3].to_string(),
        };
        let series_name = path.join(".");
        let timestamp = observed_at.trunc_subsecs(0);

        match sample {
            SampleValue::Numeric(v) => Some(Point::numeric(series_name, tags, timestamp, v)),
            SampleValue::Text(t) => Some(Point::text(series_name, tags, timestamp, t)),
            SampleValue::Unsupported(kind) => {
                self.discard(topic, kind);
                None
            }
        }
    }

    fn discard(&mut self, topic: &str, kind: &'static str) {
        self.stats.record_ignored();
        if kind == "null" {
            return;
        }
        if self.reported.insert(topic.to_string()) {
            info!("Ignoring {} of type {}", topic, kind);
        } else {
            debug!("Ignoring {} of type {}", topic, kind);
        }
    }
}
