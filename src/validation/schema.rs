//! Request schemas and their compiled validators.
//!
//! # Responsibilities
//! - Describe, per route, which request segments (query, params, headers,
//!   body) are validated and against which JSON Schema (Draft 2020-12).
//! - Compile schemas once at attach time and check each request against the
//!   compiled form.
//! - Prepare raw request data for validation: query strings and path params
//!   arrive as text, so declared `integer`, `number`, `boolean` and `array`
//!   properties are coerced before the validator runs.
//!
//! # Design Decisions
//! - Unknown keys in `query` and `body` are dropped before validation when
//!   the segment schema declares `properties` without opting into
//!   `additionalProperties`. Handlers behind a schema see only what the
//!   schema names.
//! - Headers are projected, never stripped: only declared header names are
//!   copied into the validated view, and the request itself keeps every
//!   header it arrived with.
//! - All segments are checked even after one fails, so a single 400 reports
//!   every violating segment.

use jsonschema::Validator;
use serde_json::{Map, Value};
use thiserror::Error;
use url::form_urlencoded;

use super::report::{ValidationReport, Violation};

/// A request segment subject to validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Segment {
    Headers,
    Params,
    Query,
    Body,
}

impl Segment {
    /// Validation order. Headers and params describe the envelope, so they
    /// are checked before query and body.
    pub(crate) const ORDER: [Segment; 4] =
        [Segment::Headers, Segment::Params, Segment::Query, Segment::Body];

    pub fn key(self) -> &'static str {
        match self {
            Segment::Headers => "headers",
            Segment::Params => "params",
            Segment::Query => "query",
            Segment::Body => "body",
        }
    }
}

/// Declarative validation contract for one endpoint.
///
/// Each segment is an optional JSON Schema value. Segments without a schema
/// pass through untouched.
#[derive(Clone, Debug, Default)]
pub struct RequestSchema {
    query: Option<Value>,
    params: Option<Value>,
    headers: Option<Value>,
    body: Option<Value>,
}

impl RequestSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, schema: Value) -> Self {
        self.query = Some(schema);
        self
    }

    pub fn params(mut self, schema: Value) -> Self {
        self.params = Some(schema);
        self
    }

    pub fn headers(mut self, schema: Value) -> Self {
        self.headers = Some(schema);
        self
    }

    pub fn body(mut self, schema: Value) -> Self {
        self.body = Some(schema);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.query.is_none() && self.params.is_none() && self.headers.is_none() && self.body.is_none()
    }

    fn segment(&self, segment: Segment) -> Option<&Value> {
        match segment {
            Segment::Query => self.query.as_ref(),
            Segment::Params => self.params.as_ref(),
            Segment::Headers => self.headers.as_ref(),
            Segment::Body => self.body.as_ref(),
        }
    }
}

/// A schema that failed to compile at attach time.
#[derive(Debug, Error)]
#[error("invalid {segment} schema: {reason}")]
pub struct SchemaCompileError {
    pub segment: &'static str,
    pub reason: String,
}

/// Raw request data captured before validation.
///
/// Query, params and headers are string maps (query values may be arrays
/// when a key repeats). The body is parsed JSON, `Null` when absent.
#[derive(Debug, Default)]
pub struct RawInput {
    pub query: Map<String, Value>,
    pub params: Map<String, Value>,
    pub headers: Map<String, Value>,
    pub body: Value,
}

/// The post-validation view of a request, stored as a request extension.
///
/// Validated segments hold the coerced and stripped instance the schema
/// accepted. Query and params pass through raw when unvalidated; headers
/// and body stay `Null` unless a schema asked for them.
#[derive(Clone, Debug, Default)]
pub struct ValidatedInput {
    pub query: Value,
    pub params: Value,
    pub headers: Value,
    pub body: Value,
}

impl ValidatedInput {
    fn set(&mut self, segment: Segment, value: Value) {
        match segment {
            Segment::Query => self.query = value,
            Segment::Params => self.params = value,
            Segment::Headers => self.headers = value,
            Segment::Body => self.body = value,
        }
    }
}

struct CompiledSegment {
    segment: Segment,
    schema: Value,
    validator: Validator,
}

impl CompiledSegment {
    fn collect_violations(&self, instance: &Value) -> Vec<Violation> {
        self.validator
            .iter_errors(instance)
            .map(|error| Violation {
                path: error.instance_path.to_string(),
                message: error.to_string(),
            })
            .collect()
    }
}

/// A request schema compiled into per-segment validators.
pub struct CompiledSchema {
    segments: Vec<CompiledSegment>,
}

impl CompiledSchema {
    /// Compile every declared segment. Fails on the first segment whose
    /// schema is not a valid Draft 2020-12 schema.
    pub fn compile(schema: &RequestSchema) -> Result<Self, SchemaCompileError> {
        let mut segments = Vec::new();
        for segment in Segment::ORDER {
            let Some(value) = schema.segment(segment) else {
                continue;
            };
            let mut options = jsonschema::options();
            options.with_draft(jsonschema::Draft::Draft202012);
            let validator = options.build(value).map_err(|e| SchemaCompileError {
                segment: segment.key(),
                reason: e.to_string(),
            })?;
            segments.push(CompiledSegment { segment, schema: value.clone(), validator });
        }
        Ok(CompiledSchema { segments })
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether the request body must be read and parsed before validation.
    pub fn wants_body(&self) -> bool {
        self.has(Segment::Body)
    }

    /// Whether the query string is validated (and so rewritten sanitized).
    pub fn wants_query(&self) -> bool {
        self.has(Segment::Query)
    }

    /// Check `input` against every compiled segment.
    ///
    /// Returns the validated view on success, or a report covering every
    /// failed segment.
    pub fn validate(&self, input: RawInput) -> Result<ValidatedInput, ValidationReport> {
        let mut report = ValidationReport::default();
        let mut out = ValidatedInput::default();

        for seg in &self.segments {
            let instance = match seg.segment {
                Segment::Headers => Value::Object(coerce_object(
                    project_headers(&input.headers, &seg.schema),
                    &seg.schema,
                    false,
                )),
                Segment::Params => {
                    Value::Object(coerce_object(input.params.clone(), &seg.schema, false))
                }
                Segment::Query => Value::Object(coerce_object(
                    input.query.clone(),
                    &seg.schema,
                    strips_undeclared(&seg.schema),
                )),
                Segment::Body => prepare_body(input.body.clone(), &seg.schema),
            };
            let violations = seg.collect_violations(&instance);
            if violations.is_empty() {
                out.set(seg.segment, instance);
            } else {
                report.record(seg.segment.key(), &violations);
            }
        }

        if !self.has(Segment::Query) {
            out.query = Value::Object(input.query);
        }
        if !self.has(Segment::Params) {
            out.params = Value::Object(input.params);
        }

        if report.is_empty() {
            Ok(out)
        } else {
            Err(report)
        }
    }

    fn has(&self, segment: Segment) -> bool {
        self.segments.iter().any(|s| s.segment == segment)
    }
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let segments: Vec<&str> = self.segments.iter().map(|s| s.segment.key()).collect();
        f.debug_struct("CompiledSchema").field("segments", &segments).finish()
    }
}

/// Parse a URL query string into a string map, percent-decoded. A repeated
/// key collects its values into an array.
pub fn parse_query(raw: Option<&str>) -> Map<String, Value> {
    let mut out = Map::new();
    let Some(raw) = raw else {
        return out;
    };
    for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
        let key = key.into_owned();
        let value = Value::String(value.into_owned());
        match out.get_mut(&key) {
            None => {
                out.insert(key, value);
            }
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
        }
    }
    out
}

/// Whether unknown keys are dropped before validating against `schema`.
fn strips_undeclared(schema: &Value) -> bool {
    if !schema.get("properties").map_or(false, Value::is_object) {
        return false;
    }
    matches!(schema.get("additionalProperties"), None | Some(Value::Bool(false)))
}

/// Coerce the declared properties of a string map, optionally dropping
/// undeclared keys.
fn coerce_object(map: Map<String, Value>, schema: &Value, strip: bool) -> Map<String, Value> {
    let declared = schema.get("properties").and_then(Value::as_object);
    let mut out = Map::new();
    for (key, value) in map {
        match declared.and_then(|props| props.get(&key)) {
            Some(prop_schema) => {
                out.insert(key, coerce_value(value, prop_schema));
            }
            None if strip => {}
            None => {
                out.insert(key, value);
            }
        }
    }
    out
}

fn coerce_value(value: Value, schema: &Value) -> Value {
    let types = declared_types(schema);
    match value {
        Value::String(text) => coerce_string(text, &types, schema),
        Value::Array(items) if types.contains(&"array") => {
            let item_schema = schema.get("items");
            Value::Array(
                items
                    .into_iter()
                    .map(|item| match item_schema {
                        Some(item_schema) => coerce_value(item, item_schema),
                        None => item,
                    })
                    .collect(),
            )
        }
        other => other,
    }
}

fn coerce_string(text: String, types: &[&str], schema: &Value) -> Value {
    if types.contains(&"integer") {
        if let Ok(n) = text.parse::<i64>() {
            return Value::Number(n.into());
        }
    }
    if types.contains(&"number") {
        if let Some(n) = text.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            return Value::Number(n);
        }
    }
    if types.contains(&"boolean") {
        match text.as_str() {
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            _ => {}
        }
    }
    if types.contains(&"array") {
        // A single occurrence of an array-typed key wraps into one element.
        let item = match schema.get("items") {
            Some(item_schema) => coerce_value(Value::String(text), item_schema),
            None => Value::String(text),
        };
        return Value::Array(vec![item]);
    }
    Value::String(text)
}

fn declared_types(schema: &Value) -> Vec<&str> {
    match schema.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

/// Copy declared header names out of the full header map. Lookup is by the
/// lowercased declared name, matching how header names are captured.
fn project_headers(headers: &Map<String, Value>, schema: &Value) -> Map<String, Value> {
    let mut projected = Map::new();
    if let Some(declared) = schema.get("properties").and_then(Value::as_object) {
        for name in declared.keys() {
            if let Some(value) = headers.get(&name.to_ascii_lowercase()) {
                projected.insert(name.clone(), value.clone());
            }
        }
    }
    projected
}

/// An absent body validates as an empty object. Unknown body keys are
/// dropped under the same rule as query keys.
fn prepare_body(body: Value, schema: &Value) -> Value {
    let body = if body.is_null() { Value::Object(Map::new()) } else { body };
    match body {
        Value::Object(map) if strips_undeclared(schema) => {
            let declared = schema.get("properties").and_then(Value::as_object);
            Value::Object(
                map.into_iter()
                    .filter(|(key, _)| declared.map_or(false, |props| props.contains_key(key)))
                    .collect(),
            )
        }
        other => other,
    }
}
