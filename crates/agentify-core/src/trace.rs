//! Execution trace records for the operator surface
//!
//! The core pushes a record to the sink for every backend call (before and
//! after, or before and error). The sink is an explicit observer the
//! components receive by injection; the default implementation writes
//! through `tracing`, a status dashboard would be another consumer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::constants::{TRACE_MAX_PAYLOAD_BYTES, TRACE_MAX_STRING_CHARS};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceDirection {
    Request,
    Response,
    Error,
}

/// One trace record
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub timestamp: DateTime<Utc>,
    pub direction: TraceDirection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_id: Option<String>,
    pub method: String,
    /// Size-capped params or result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TraceEvent {
    pub fn request(backend_id: &str, method: &str, params: Option<&Value>) -> Self {
        Self {
            timestamp: Utc::now(),
            direction: TraceDirection::Request,
            backend_id: Some(backend_id.to_string()),
            method: method.to_string(),
            payload: params.map(cap_payload),
            error: None,
        }
    }

    pub fn response(backend_id: &str, method: &str, result: &Value) -> Self {
        Self {
            timestamp: Utc::now(),
            direction: TraceDirection::Response,
            backend_id: Some(backend_id.to_string()),
            method: method.to_string(),
            payload: Some(cap_payload(result)),
            error: None,
        }
    }

    pub fn error(backend_id: &str, method: &str, error: impl ToString) -> Self {
        Self {
            timestamp: Utc::now(),
            direction: TraceDirection::Error,
            backend_id: Some(backend_id.to_string()),
            method: method.to_string(),
            payload: None,
            error: Some(error.to_string()),
        }
    }
}

/// Observer for trace records
pub trait TraceSink: Send + Sync {
    fn record(&self, event: TraceEvent);
}

/// Default sink: structured log lines via `tracing`
pub struct LogTraceSink;

impl TraceSink for LogTraceSink {
    fn record(&self, event: TraceEvent) {
        match event.direction {
            TraceDirection::Error => tracing::warn!(
                backend = event.backend_id.as_deref().unwrap_or("-"),
                method = %event.method,
                error = event.error.as_deref().unwrap_or("-"),
                "trace"
            ),
            _ => tracing::debug!(
                backend = event.backend_id.as_deref().unwrap_or("-"),
                method = %event.method,
                direction = ?event.direction,
                payload = %event
                    .payload
                    .as_ref()
                    .map(|p| p.to_string())
                    .unwrap_or_default(),
                "trace"
            ),
        }
    }
}

/// Cap a payload for tracing: oversized values become a summary, long
/// strings are truncated. Keeps trace volume bounded regardless of what
/// backends return.
pub fn cap_payload(value: &Value) -> Value {
    let capped = cap_strings(value);
    let serialized = capped.to_string();
    if serialized.len() > TRACE_MAX_PAYLOAD_BYTES {
        return json!({
            "truncated": true,
            "bytes": serialized.len(),
            "summary": summarize(value),
        });
    }
    capped
}

fn cap_strings(value: &Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > TRACE_MAX_STRING_CHARS => {
            let head: String = s.chars().take(TRACE_MAX_STRING_CHARS).collect();
            Value::String(format!("{head}… ({} chars)", s.chars().count()))
        }
        Value::Array(items) => Value::Array(items.iter().map(cap_strings).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), cap_strings(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn summarize(value: &Value) -> String {
    match value {
        Value::Object(map) => format!("object with {} keys", map.len()),
        Value::Array(items) => format!("array with {} items", items.len()),
        Value::String(s) => format!("string of {} chars", s.chars().count()),
        other => other.to_string(),
    }
}

/// Test sink capturing every record in order
#[cfg(test)]
pub struct RecordingTraceSink {
    pub events: std::sync::Mutex<Vec<TraceEvent>>,
}

#[cfg(test)]
impl RecordingTraceSink {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn methods(&self) -> Vec<(TraceDirection, String)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.direction, e.method.clone()))
            .collect()
    }
}

#[cfg(test)]
impl TraceSink for RecordingTraceSink {
    fn record(&self, event: TraceEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_string_truncated() {
        let long = "x".repeat(600);
        let capped = cap_strings(&Value::String(long));
        let s = capped.as_str().unwrap();
        assert!(s.starts_with(&"x".repeat(100)));
        assert!(s.ends_with("(600 chars)"));
    }

    #[test]
    fn test_oversized_object_summarized() {
        let mut map = serde_json::Map::new();
        for i in 0..40 {
            map.insert(format!("key_{i}"), json!("v".repeat(40)));
        }
        let big = Value::Object(map);
        let capped = cap_payload(&big);
        assert_eq!(capped["truncated"], json!(true));
        assert_eq!(capped["summary"], json!("object with 40 keys"));
    }

    #[test]
    fn test_long_string_payload_truncated_not_summarized() {
        let capped = cap_payload(&json!({ "data": "y".repeat(2000) }));
        assert!(capped["data"].as_str().unwrap().ends_with("(2000 chars)"));
    }

    #[test]
    fn test_small_payload_passes_through() {
        let small = json!({"path": "/tmp", "recursive": false});
        assert_eq!(cap_payload(&small), small);
    }

    #[test]
    fn test_nested_strings_capped() {
        let v = json!({"outer": {"inner": "z".repeat(40)}});
        assert_eq!(cap_payload(&v), v);

        let v = json!(["a", "b".repeat(501)]);
        let capped = cap_payload(&v);
        assert!(capped[1].as_str().unwrap().contains("(501 chars)"));
    }
}
