//! Per-route execution pipeline.
//!
//! # Responsibilities
//! - Run a route's middleware stages in order, stopping at the first one
//!   that responds directly
//! - Capture query, path params, headers and body, validate them against
//!   the route's compiled schema, and expose the validated view to the
//!   handler as a request extension
//! - Record per-route request metrics
//!
//! # Design Decisions
//! - Validation runs after the middleware stages and immediately before the
//!   handler, so middleware rewrites are what get validated
//! - The body is read only when a body schema exists; handlers on other
//!   routes stream the body untouched
//! - A body over the configured limit is 413; a stream that breaks
//!   mid-read is 400
//! - A validation failure produces a 400 carrying the report as an
//!   extension; the translator layer renders the JSON body

use std::sync::Arc;
use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::extract::{FromRequestParts, RawPathParams, Request};
use axum::http::request::Parts;
use axum::http::uri::PathAndQuery;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value};
use tracing::debug;
use url::form_urlencoded;

use crate::observability::metrics;
use crate::registry::{Flow, HandlerFn, MiddlewareFn};
use crate::validation::{parse_query, CompiledSchema, RawInput, ValidationReport, Violation};

/// An attached route's executable pipeline: middlewares, optional
/// validation, then the handler.
pub struct RouteChain {
    method: String,
    path: String,
    id: String,
    middlewares: Vec<MiddlewareFn>,
    schema: Option<Arc<CompiledSchema>>,
    handler: HandlerFn,
    max_body_bytes: usize,
}

impl RouteChain {
    pub(crate) fn new(
        method: &str,
        path: &str,
        middlewares: Vec<MiddlewareFn>,
        schema: Option<CompiledSchema>,
        handler: HandlerFn,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            method: method.to_lowercase(),
            path: path.to_string(),
            id: format!("{} {}", method.to_uppercase(), path),
            middlewares,
            schema: schema.map(Arc::new),
            handler,
            max_body_bytes,
        }
    }

    /// Drive a request through the chain and record its outcome.
    pub async fn execute(&self, request: Request) -> Response {
        let start = Instant::now();
        let response = self.run(request).await;
        metrics::record_request(&self.method, &self.path, response.status().as_u16(), start);
        response
    }

    async fn run(&self, mut request: Request) -> Response {
        for (stage, middleware) in self.middlewares.iter().enumerate() {
            match middleware(request).await {
                Flow::Continue(next) => request = next,
                Flow::Respond(response) => {
                    debug!(route = %self.id, stage, "Middleware short-circuited");
                    return response;
                }
            }
        }

        if let Some(schema) = &self.schema {
            let (mut parts, body) = request.into_parts();

            let query = parse_query(parts.uri.query());
            let params = path_params(&mut parts).await;
            let headers = headers_map(&parts.headers);

            let (body_value, body) = if schema.wants_body() {
                let bytes = match to_bytes(body, self.max_body_bytes).await {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        debug!(route = %self.id, %error, "Failed to read request body");
                        let status = if is_length_limit(&error) {
                            StatusCode::PAYLOAD_TOO_LARGE
                        } else {
                            StatusCode::BAD_REQUEST
                        };
                        return status.into_response();
                    }
                };
                let value = if bytes.is_empty() {
                    Value::Null
                } else {
                    match serde_json::from_slice(&bytes) {
                        Ok(value) => value,
                        Err(_) => {
                            return self.reject(invalid_json_report());
                        }
                    }
                };
                (value, Body::from(bytes))
            } else {
                (Value::Null, body)
            };

            let input = RawInput { query, params, headers, body: body_value };
            let validated = match schema.validate(input) {
                Ok(validated) => validated,
                Err(report) => {
                    return self.reject(report);
                }
            };

            // The handler sees the sanitized request: coerced and stripped
            // query in the URI, sanitized body bytes, headers untouched.
            if schema.wants_query() {
                rewrite_query(&mut parts, &validated.query);
            }
            let body = if schema.wants_body() {
                serde_json::to_vec(&validated.body).map(Body::from).unwrap_or(body)
            } else {
                body
            };
            parts.extensions.insert(validated);
            request = Request::from_parts(parts, body);
        }

        (self.handler)(request).await
    }

    fn reject(&self, report: ValidationReport) -> Response {
        debug!(route = %self.id, report = %report, "Request failed validation");
        metrics::record_validation_rejection(&self.path);
        report.into_response()
    }
}

impl std::fmt::Debug for RouteChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteChain")
            .field("id", &self.id)
            .field("middlewares", &self.middlewares.len())
            .field("validated", &self.schema.is_some())
            .finish()
    }
}

/// Path captures from the router, empty when the route has none.
async fn path_params(parts: &mut Parts) -> Map<String, Value> {
    match RawPathParams::from_request_parts(parts, &()).await {
        Ok(raw) => raw
            .iter()
            .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
            .collect(),
        Err(_) => Map::new(),
    }
}

/// Header names lowercased; repeated headers join with `, `.
fn headers_map(headers: &HeaderMap) -> Map<String, Value> {
    let mut out = Map::new();
    for (name, value) in headers {
        let text = String::from_utf8_lossy(value.as_bytes()).into_owned();
        match out.get_mut(name.as_str()) {
            Some(Value::String(existing)) => {
                existing.push_str(", ");
                existing.push_str(&text);
            }
            _ => {
                out.insert(name.as_str().to_string(), Value::String(text));
            }
        }
    }
    out
}

/// Replace the URI query with the sanitized map, percent-encoded. Repeated
/// keys come back from array values; non-string scalars print as JSON.
fn rewrite_query(parts: &mut Parts, query: &Value) {
    let Some(map) = query.as_object() else {
        return;
    };
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in map {
        match value {
            Value::Array(items) => {
                for item in items {
                    serializer.append_pair(key, &scalar_text(item));
                }
            }
            other => {
                serializer.append_pair(key, &scalar_text(other));
            }
        }
    }
    let encoded = serializer.finish();

    let path = parts.uri.path();
    let path_and_query =
        if encoded.is_empty() { path.to_string() } else { format!("{path}?{encoded}") };
    if let Ok(rewritten) = path_and_query.parse::<PathAndQuery>() {
        let mut uri_parts = parts.uri.clone().into_parts();
        uri_parts.path_and_query = Some(rewritten);
        if let Ok(uri) = Uri::from_parts(uri_parts) {
            parts.uri = uri;
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// The size limit surfaces as a `LengthLimitError` somewhere in the error
/// chain; any other read failure is the stream breaking mid-body.
fn is_length_limit(error: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(current) = source {
        if current.is::<http_body_util::LengthLimitError>() {
            return true;
        }
        source = current.source();
    }
    false
}

fn invalid_json_report() -> ValidationReport {
    let mut report = ValidationReport::default();
    report.record(
        "body",
        &[Violation {
            path: String::new(),
            message: "request body is not valid JSON".to_string(),
        }],
    );
    report
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::registry::{Export, Module};
    use crate::validation::{RequestSchema, ValidatedInput};

    fn handler_fn(module: Module) -> HandlerFn {
        match module.root {
            Export::Handler(f) => f,
            _ => panic!("not a handler"),
        }
    }

    fn middleware_fn(module: Module) -> MiddlewareFn {
        match module.root {
            Export::Middleware(f) => f,
            _ => panic!("not a middleware"),
        }
    }

    fn get(uri: &str) -> Request {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn chain(
        middlewares: Vec<MiddlewareFn>,
        schema: Option<RequestSchema>,
        handler: HandlerFn,
    ) -> RouteChain {
        let compiled = schema.map(|s| CompiledSchema::compile(&s).unwrap());
        RouteChain::new("get", "/test", middlewares, compiled, handler, 1024)
    }

    #[tokio::test]
    async fn middlewares_run_in_order_before_the_handler() {
        static TRACE: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

        let first = middleware_fn(Module::from_middleware(|req| async move {
            TRACE.lock().unwrap().push("first");
            Flow::Continue(req)
        }));
        let second = middleware_fn(Module::from_middleware(|req| async move {
            TRACE.lock().unwrap().push("second");
            Flow::Continue(req)
        }));
        let handler = handler_fn(Module::from_handler(|_req| async {
            TRACE.lock().unwrap().push("handler");
            "done"
        }));

        let response = chain(vec![first, second], None, handler).execute(get("/test")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*TRACE.lock().unwrap(), vec!["first", "second", "handler"]);
    }

    #[tokio::test]
    async fn a_responding_middleware_skips_the_rest() {
        static HANDLER_RAN: AtomicBool = AtomicBool::new(false);

        let gate = middleware_fn(Module::from_middleware(|_req| async {
            Flow::respond((StatusCode::UNAUTHORIZED, "no token"))
        }));
        let handler = handler_fn(Module::from_handler(|_req| async {
            HANDLER_RAN.store(true, Ordering::SeqCst);
            "done"
        }));

        let response = chain(vec![gate], None, handler).execute(get("/test")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(!HANDLER_RAN.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn middleware_rewrites_reach_the_handler() {
        let stamp = middleware_fn(Module::from_middleware(|mut req: Request| async move {
            req.headers_mut().insert("x-stamped", "yes".parse().unwrap());
            Flow::Continue(req)
        }));
        let handler = handler_fn(Module::from_handler(|req: Request| async move {
            match req.headers().get("x-stamped") {
                Some(_) => StatusCode::OK,
                None => StatusCode::INTERNAL_SERVER_ERROR,
            }
        }));

        let response = chain(vec![stamp], None, handler).execute(get("/test")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn validation_failure_rejects_before_the_handler() {
        static HANDLER_RAN: AtomicBool = AtomicBool::new(false);

        let schema = RequestSchema::new().query(json!({
            "type": "object",
            "properties": { "limit": { "type": "integer", "maximum": 10 } },
            "required": ["limit"]
        }));
        let handler = handler_fn(Module::from_handler(|_req| async {
            HANDLER_RAN.store(true, Ordering::SeqCst);
            "done"
        }));

        let response = chain(Vec::new(), Some(schema), handler)
            .execute(get("/test?limit=11"))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.extensions().get::<ValidationReport>().is_some());
        assert!(!HANDLER_RAN.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn the_handler_sees_the_validated_view() {
        let schema = RequestSchema::new().query(json!({
            "type": "object",
            "properties": { "limit": { "type": "integer", "maximum": 10 } },
            "additionalProperties": false
        }));
        let handler = handler_fn(Module::from_handler(|req: Request| async move {
            let input = req.extensions().get::<ValidatedInput>().cloned().unwrap();
            axum::Json(input.query)
        }));

        let response = chain(Vec::new(), Some(schema), handler)
            .execute(get("/test?limit=7&noise=x"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({ "limit": 7 }));
    }

    #[tokio::test]
    async fn the_uri_query_is_rewritten_sanitized() {
        let schema = RequestSchema::new().query(json!({
            "type": "object",
            "properties": { "limit": { "type": "integer", "maximum": 10 } },
            "additionalProperties": false
        }));
        let handler = handler_fn(Module::from_handler(|req: Request| async move {
            req.uri().query().unwrap_or("").to_string()
        }));

        let response = chain(Vec::new(), Some(schema), handler)
            .execute(get("/test?limit=7&noise=x"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"limit=7");
    }

    #[tokio::test]
    async fn malformed_json_bodies_fail_validation() {
        let schema = RequestSchema::new().body(json!({ "type": "object" }));
        let handler = handler_fn(Module::from_handler(|_req| async { "done" }));

        let request = Request::builder()
            .method("POST")
            .uri("/test")
            .body(Body::from("{not json"))
            .unwrap();
        let response = chain(Vec::new(), Some(schema), handler).execute(request).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let report = response.extensions().get::<ValidationReport>().unwrap();
        assert!(report.segment("body").unwrap().message.contains("not valid JSON"));
    }

    #[tokio::test]
    async fn oversized_bodies_are_cut_off() {
        let schema = RequestSchema::new().body(json!({ "type": "object" }));
        let handler = handler_fn(Module::from_handler(|_req| async { "done" }));

        let request = Request::builder()
            .method("POST")
            .uri("/test")
            .body(Body::from("x".repeat(4096)))
            .unwrap();
        let response = chain(Vec::new(), Some(schema), handler).execute(request).await;

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn broken_body_streams_do_not_read_as_oversize() {
        let schema = RequestSchema::new().body(json!({ "type": "object" }));
        let handler = handler_fn(Module::from_handler(|_req| async { "done" }));

        let interrupted = Body::from_stream(futures_util::stream::once(async {
            Err::<Vec<u8>, std::io::Error>(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ))
        }));
        let request =
            Request::builder().method("POST").uri("/test").body(interrupted).unwrap();
        let response = chain(Vec::new(), Some(schema), handler).execute(request).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.extensions().get::<ValidationReport>().is_none());
    }
}
