//! Audit reports and typed metric resolution.
//!
//! An [`AuditReport`] is the immutable document the audit engine produced for
//! one sample. It is laid out as a route payload: the engine's own report
//! under `report`, optionally page metadata under `seo`. Metric paths such as
//! `report.audits.first-contentful-paint.numericValue` are resolved against it
//! with [`resolve_metric`], which never fails: a missing segment yields `None`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Immutable structured result of one successful audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditReport(Value);

impl AuditReport {
    /// Wrap a full route payload (`{"report": .., "seo": ..}`) as-is.
    pub fn from_document(document: Value) -> Self {
        Self(document)
    }

    /// Wrap a bare engine report, placing it under the `report` key.
    ///
    /// Documents that already carry a top-level `report` object are kept as-is.
    pub fn from_engine_output(output: Value) -> Self {
        if output.get("report").is_some_and(Value::is_object) {
            return Self(output);
        }
        Self(serde_json::json!({ "report": output }))
    }

    pub fn document(&self) -> &Value {
        &self.0
    }

    pub fn into_document(self) -> Value {
        self.0
    }

    /// Shorthand for [`resolve_metric`] on this report.
    pub fn metric(&self, path: &str) -> Option<&Value> {
        resolve_metric(self, path)
    }

    /// Numeric value at `path`, if present and numeric.
    pub fn number(&self, path: &str) -> Option<f64> {
        self.metric(path).and_then(Value::as_f64)
    }
}

/// Resolve a dotted metric path against a report.
///
/// Object segments are looked up by key, array segments by index. Any
/// mismatch, including a `null` leaf, resolves to `None`.
pub fn resolve_metric<'a>(report: &'a AuditReport, path: &str) -> Option<&'a Value> {
    resolve_path(&report.0, path)
}

pub(crate) fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// A resolved metric in display form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetricValue {
    Number(f64),
    Text(String),
    Flag(bool),
    /// Arrays and objects are passed through for the renderer.
    Structured(Value),
    /// The path did not resolve against the report.
    NoData,
}

impl MetricValue {
    pub fn is_no_data(&self) -> bool {
        matches!(self, MetricValue::NoData)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            MetricValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<Option<&Value>> for MetricValue {
    fn from(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => MetricValue::NoData,
            Some(Value::Number(n)) => n
                .as_f64()
                .map(MetricValue::Number)
                .unwrap_or(MetricValue::NoData),
            Some(Value::String(s)) => MetricValue::Text(s.clone()),
            Some(Value::Bool(b)) => MetricValue::Flag(*b),
            Some(other) => MetricValue::Structured(other.clone()),
        }
    }
}
