//! Structured validation failure reports.
//!
//! # Responsibilities
//! - Collect per-segment violations produced while checking a request
//!   against its schema.
//! - Render the client-facing 400 body: a `validation` object keyed by
//!   request segment, each entry naming the source, the offending keys and
//!   a combined message.
//!
//! # Design Decisions
//! - The report travels as a response extension. The chain that detects the
//!   failure returns a bare 400 carrying the report; the translator layer
//!   installed at attach time renders the JSON body. Formatting stays in one
//!   place no matter how many routes produce reports.

use std::collections::BTreeMap;
use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{json, Map, Value};

/// A single schema violation.
#[derive(Debug, Clone)]
pub struct Violation {
    /// JSON Pointer to the violating field, empty for root-level failures.
    pub path: String,
    /// Human-readable description from the validator.
    pub message: String,
}

/// All violations for one request segment.
#[derive(Debug, Clone)]
pub struct SegmentReport {
    /// Segment name: `query`, `params`, `headers` or `body`.
    pub source: &'static str,
    /// Top-level keys involved in the violations, in first-seen order.
    pub keys: Vec<String>,
    /// Violation messages joined with `; `.
    pub message: String,
}

/// Validation outcome for a request that failed at least one segment.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    segments: BTreeMap<&'static str, SegmentReport>,
}

impl ValidationReport {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segment(&self, source: &str) -> Option<&SegmentReport> {
        self.segments.get(source)
    }

    pub fn sources(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.segments.keys().copied()
    }

    /// Fold a segment's violations into the report.
    pub(crate) fn record(&mut self, source: &'static str, violations: &[Violation]) {
        if violations.is_empty() {
            return;
        }
        let mut keys: Vec<String> = Vec::new();
        for violation in violations {
            if let Some(key) = key_hint(violation) {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        let message = violations
            .iter()
            .map(|v| v.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        self.segments.insert(source, SegmentReport { source, keys, message });
    }

    /// Client-facing body for the 400 response.
    pub fn to_body(&self) -> Value {
        let mut validation = Map::new();
        for (source, segment) in &self.segments {
            validation.insert(
                (*source).to_string(),
                json!({
                    "source": segment.source,
                    "keys": segment.keys,
                    "message": segment.message,
                }),
            );
        }
        json!({
            "statusCode": StatusCode::BAD_REQUEST.as_u16(),
            "error": "Bad Request",
            "message": "Validation failed",
            "validation": validation,
        })
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (source, segment)) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{source}: {}", segment.message)?;
        }
        Ok(())
    }
}

impl IntoResponse for ValidationReport {
    /// A bare 400 carrying the report as an extension. The translator layer
    /// turns it into the JSON body before it leaves the router.
    fn into_response(self) -> Response {
        let mut response = StatusCode::BAD_REQUEST.into_response();
        response.extensions_mut().insert(self);
        response
    }
}

/// Top-level key a violation points at.
///
/// Root-level failures carry an empty pointer; for missing required
/// properties the validator names the key in the message, quoted, so it is
/// recovered from there.
fn key_hint(violation: &Violation) -> Option<String> {
    let first = violation
        .path
        .trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or("");
    if !first.is_empty() {
        return Some(first.to_string());
    }
    if !violation.message.contains("required") {
        return None;
    }
    let rest = violation.message.strip_prefix('"')?;
    let end = rest.find('"')?;
    let key = &rest[..end];
    (!key.is_empty()).then(|| key.to_string())
}
