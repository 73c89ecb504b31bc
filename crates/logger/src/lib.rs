/// arbfeed-live — Logger
/// JSONL event stream, structured log sinks, secret redaction, correlation ids

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Replacement written in place of any secret-looking field.
pub const REDACTED: &str = "[REDACTED]";

/// Substrings (after lowercasing and dropping `_`, `-`, space) that mark a key as secret.
const SECRET_MARKERS: [&str; 4] = ["apikey", "token", "secret", "password"];

pub struct EventLogger {
    log_dir: PathBuf,
}

impl EventLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        let dir = log_dir.into();
        fs::create_dir_all(&dir).ok();
        Self { log_dir: dir }
    }

    /// Append one event as a JSON line into `<log_dir>/<YYYY-MM-DD>.jsonl`.
    /// Secret-looking fields are redacted before the line is written.
    pub fn log<T: Serialize>(&self, event: &T) -> Result<()> {
        let mut value = serde_json::to_value(event)?;
        redact_secrets(&mut value);
        self.append_line(&value)
    }

    fn append_line(&self, value: &Value) -> Result<()> {
        let date  = Utc::now().format("%Y-%m-%d").to_string();
        let path  = self.log_dir.join(format!("{date}.jsonl"));
        let line  = serde_json::to_string(value)?;
        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Opaque id tying together the log lines of one logical request.
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

// ── Redaction ────────────────────────────────────────────────────────────────

pub fn is_secret_key(key: &str) -> bool {
    let folded: String = key
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' ' | '.'))
        .flat_map(char::to_lowercase)
        .collect();
    SECRET_MARKERS.iter().any(|m| folded.contains(m))
}

/// Replace the value of every secret-looking key, at any depth.
pub fn redact_secrets(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if is_secret_key(key) {
                    *v = Value::String(REDACTED.to_string());
                } else {
                    redact_secrets(v);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_secrets),
        _ => {}
    }
}

// ── Structured sinks ─────────────────────────────────────────────────────────

/// Destination for structured events. Receives fields that were already redacted.
pub trait LogSink: Send + Sync {
    fn emit(&self, event: &str, fields: &Value);
}

/// Forwards structured events to `tracing`.
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, event: &str, fields: &Value) {
        let is_error = fields
            .get("errorCategory")
            .map_or(false, |c| !c.is_null());
        if is_error {
            tracing::warn!(event = event, fields = %fields, "structured event");
        } else {
            tracing::info!(event = event, fields = %fields, "structured event");
        }
    }
}

impl LogSink for EventLogger {
    fn emit(&self, event: &str, fields: &Value) {
        let mut line = Map::new();
        line.insert("ts".into(), Value::String(now_iso()));
        line.insert("event".into(), Value::String(event.to_string()));
        if let Value::Object(extra) = fields {
            for (k, v) in extra {
                line.insert(k.clone(), v.clone());
            }
        }
        if let Err(e) = self.append_line(&Value::Object(line)) {
            tracing::warn!("Log write failed: {e}");
        }
    }
}

/// Context fields every structured event carries. `extra` holds anything else.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFields {
    pub context:        String,
    pub operation:      String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id:    Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms:    Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<String>,
    #[serde(flatten)]
    pub extra:          Map<String, Value>,
}

impl LogFields {
    pub fn new(context: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            operation: operation.into(),
            ..Self::default()
        }
    }

    pub fn provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    pub fn correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    pub fn error_category(mut self, category: impl Into<String>) -> Self {
        self.error_category = Some(category.into());
        self
    }

    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let v = serde_json::to_value(value).unwrap_or(Value::Null);
        self.extra.insert(key.to_string(), v);
        self
    }
}

/// Fan-out logger. Redaction happens here, before any sink sees the fields.
#[derive(Clone)]
pub struct StructuredLogger {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::tracing_only()
    }
}

impl StructuredLogger {
    pub fn new(sinks: Vec<Arc<dyn LogSink>>) -> Self {
        Self { sinks }
    }

    pub fn tracing_only() -> Self {
        Self::new(vec![Arc::new(TracingSink)])
    }

    /// tracing + JSONL files in `log_dir`
    pub fn with_jsonl(log_dir: impl Into<PathBuf>) -> Self {
        Self::new(vec![Arc::new(TracingSink), Arc::new(EventLogger::new(log_dir))])
    }

    pub fn emit(&self, event: &str, fields: LogFields) {
        let value = serde_json::to_value(&fields).unwrap_or(Value::Null);
        self.emit_value(event, value);
    }

    pub fn emit_value(&self, event: &str, mut fields: Value) {
        redact_secrets(&mut fields);
        for sink in &self.sinks {
            sink.emit(event, &fields);
        }
    }
}

// ── Event types ────────────────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
pub struct OpportunityEvent {
    pub ts:             String,
    pub event:          &'static str,   // "ARB_OPPORTUNITY"
    pub id:             String,
    pub provider:       String,
    pub sport:          String,
    pub event_name:     String,
    pub event_date:     String,
    pub roi_pct:        f64,
    pub outcome_a:      String,
    pub outcome_a_odds: f64,
    pub bookmaker_a:    String,
    pub stake_a:        Option<f64>,    // for 100 units total
    pub outcome_b:      String,
    pub outcome_b_odds: f64,
    pub bookmaker_b:    String,
    pub stake_b:        Option<f64>,
}

#[derive(Serialize, Debug)]
pub struct FeedCycleEvent {
    pub ts:                      String,
    pub event:                   &'static str,   // "FEED_CYCLE"
    pub opportunities:           usize,
    pub provider_errors:         usize,
    pub cross_provider_fixtures: usize,
    pub duration_ms:             u64,
}

#[derive(Serialize, Debug)]
pub struct CalibrationEvent {
    pub ts:                  String,
    pub event:               &'static str,   // "CALIBRATION_RESULT"
    pub provider:            String,
    pub iterations:          u32,
    pub p50_ms:              f64,
    pub p95_ms:              f64,
    pub requests_per_hour:   u64,
    pub hourly_quota:        u32,
    pub quota_safe:          bool,
}
