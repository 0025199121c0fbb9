//! Shared utilities for integration testing.

use std::net::SocketAddr;

use axum::http::{HeaderValue, StatusCode};
use axum::Json;
use route_loader::config::{AppConfig, RouteSpec};
use route_loader::validation::{RequestSchema, ValidatedInput};
use route_loader::{AppServer, Flow, Module, ModuleRegistry};
use serde_json::json;
use tokio::net::TcpListener;

/// Bind an ephemeral port, spawn the server on it, and hand back the
/// address. The listener is bound before the spawn, so clients can
/// connect as soon as this returns.
pub async fn serve(config: AppConfig, registry: ModuleRegistry) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = AppServer::new(config, registry).expect("route table should attach");
    tokio::spawn(async move {
        let _ = server.run_until(listener, std::future::pending()).await;
    });
    addr
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// A config with the given route table and everything else defaulted.
pub fn base_config(routes: Vec<RouteSpec>) -> AppConfig {
    let mut config = AppConfig::default();
    config.routing.routes = routes;
    config
}

/// Registry used across the suites: echo handlers, tagging middlewares,
/// an API key check, and a managed todo endpoint.
pub fn demo_registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();

    registry.register("handlers/ping", Module::from_handler(|_request| async { "pong" }));

    // Echoes the validated view of the request.
    registry.register(
        "handlers/echo",
        Module::from_handler(|request| async move {
            let input =
                request.extensions().get::<ValidatedInput>().cloned().unwrap_or_default();
            Json(json!({
                "query": input.query,
                "params": input.params,
                "headers": input.headers,
                "body": input.body,
            }))
        }),
    );

    // Echoes the x-trail header accumulated by the tagging middlewares.
    registry.register(
        "handlers/trail",
        Module::from_handler(|request| async move {
            request
                .headers()
                .get("x-trail")
                .and_then(|value| value.to_str().ok())
                .unwrap_or("")
                .to_string()
        }),
    );

    registry.register(
        "handlers/todo",
        Module::builder()
            .manager(
                "list",
                RequestSchema::new().query(json!({
                    "type": "object",
                    "properties": {
                        "limit": { "type": "integer", "minimum": 1, "maximum": 10 },
                        "done": { "type": "boolean" }
                    },
                    "additionalProperties": false
                })),
                |request| async move {
                    let input =
                        request.extensions().get::<ValidatedInput>().cloned().unwrap_or_default();
                    Json(json!({ "query": input.query }))
                },
            )
            .manager(
                "create",
                RequestSchema::new().body(json!({
                    "type": "object",
                    "properties": {
                        "title": { "type": "string", "minLength": 1 },
                        "done": { "type": "boolean" }
                    },
                    "required": ["title"],
                    "additionalProperties": false
                })),
                |request| async move {
                    let input =
                        request.extensions().get::<ValidatedInput>().cloned().unwrap_or_default();
                    (StatusCode::CREATED, Json(json!({ "created": input.body })))
                },
            )
            .handler("fetch", |request| async move {
                let input =
                    request.extensions().get::<ValidatedInput>().cloned().unwrap_or_default();
                Json(json!({ "id": input.params["id"] }))
            })
            .schema(
                "fetch_schema",
                RequestSchema::new().params(json!({
                    "type": "object",
                    "properties": { "id": { "type": "integer", "minimum": 1 } },
                    "required": ["id"]
                })),
            )
            .group("inner", |group| group.handler("deep", |_request| async { "deep" }))
            .finish(),
    );

    registry.register("middleware/tag_a", tag_middleware("a"));
    registry.register("middleware/tag_b", tag_middleware("b"));

    registry.register(
        "middleware/auth",
        Module::from_middleware(|request| async move {
            match request.headers().get("x-api-key") {
                Some(key) if key == "secret" => Flow::Continue(request),
                _ => Flow::respond((StatusCode::UNAUTHORIZED, "Missing or invalid API key")),
            }
        }),
    );

    registry
}

/// Middleware appending `tag` to the request's x-trail header.
fn tag_middleware(tag: &'static str) -> Module {
    Module::from_middleware(move |mut request| async move {
        let trail = request
            .headers()
            .get("x-trail")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        let next = if trail.is_empty() { tag.to_string() } else { format!("{trail},{tag}") };
        request
            .headers_mut()
            .insert("x-trail", HeaderValue::from_str(&next).unwrap());
        Flow::Continue(request)
    })
}
