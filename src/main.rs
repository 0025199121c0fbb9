//! Declarative Route Loader (v1)
//!
//! A declarative route loader for axum, driven by a TOML/JSON route table.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────┐
//!                      │                  ROUTE LOADER                    │
//!                      │                                                  │
//!   routes.toml        │  ┌─────────┐    ┌──────────┐    ┌────────────┐  │
//!   ───────────────────┼─▶│ config  │───▶│ registry │───▶│  routing   │  │
//!                      │  │ loader  │    │ resolver │    │ assembler  │  │
//!                      │  └─────────┘    └──────────┘    └─────┬──────┘  │
//!                      │                                       │         │
//!                      │                                       ▼         │
//!   Client Request     │  ┌─────────┐    ┌──────────┐    ┌────────────┐  │
//!   ───────────────────┼─▶│  http   │───▶│  route   │───▶│ validation │  │
//!                      │  │ server  │    │  chain   │    │   stage    │  │
//!   Client Response    │  └─────────┘    └──────────┘    └─────┬──────┘  │
//!   ◀──────────────────┼────────────────────────────────────── ▼ handler │
//!                      │                                                  │
//!                      │  ┌────────────────────────────────────────────┐ │
//!                      │  │           Cross-Cutting Concerns           │ │
//!                      │  │   ┌─────────┐  ┌─────────┐  ┌──────────┐   │ │
//!                      │  │   │ config  │  │ logging │  │ metrics  │   │ │
//!                      │  │   └─────────┘  └─────────┘  └──────────┘   │ │
//!                      │  └────────────────────────────────────────────┘ │
//!                      └──────────────────────────────────────────────────┘
//! ```
//!
//! The binary serves a small demo registry; applications depend on the
//! library crate and register their own modules.

// Core subsystems
pub mod config;
pub mod http;
pub mod registry;
pub mod routing;

// Request validation
pub mod validation;

// Cross-cutting concerns
pub mod observability;

use std::path::PathBuf;

use axum::http::StatusCode;
use axum::Json;
use clap::Parser;
use serde_json::json;
use tokio::net::TcpListener;

use crate::config::{load_config, AppConfig, RefList, RouteSpec};
use crate::http::AppServer;
use crate::registry::{Flow, Module, ModuleRegistry};
use crate::validation::{RequestSchema, ValidatedInput};

#[derive(Parser)]
#[command(name = "route-loader")]
#[command(about = "Declarative route loader demo server", long_about = None)]
struct Args {
    /// Path to the route table (TOML or JSON). Serves the built-in demo
    /// table when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address override (e.g., "127.0.0.1:3000").
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => demo_config(),
    };
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }

    // Initialize tracing subscriber
    observability::init_logging(&config.observability.log_level);

    tracing::info!("route-loader v0.1.0 starting");

    match &args.config {
        Some(path) => tracing::info!(
            config_file = %path.display(),
            bind_address = %config.server.bind_address,
            routes = config.routing.routes.len(),
            "Configuration loaded"
        ),
        None => tracing::info!(
            bind_address = %config.server.bind_address,
            routes = config.routing.routes.len(),
            "Serving the built-in demo route table"
        ),
    }

    // Initialize metrics server
    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            crate::observability::metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    // Bind TCP listener
    let listener = TcpListener::bind(&config.server.bind_address).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        address = %local_addr,
        "Listening for connections"
    );

    // Create and run HTTP server
    let server = AppServer::new(config, demo_registry())?;
    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// The route table served when no config file is given. `demos/routes.toml`
/// holds the same table in file form.
fn demo_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.observability.log_level = "debug".to_string();
    config.observability.metrics_enabled = false;
    config.routing.global.middleware = RefList::One("middleware/trace".to_string());
    config.routing.routes = vec![
        RouteSpec::new("GET", "/ping").handler("handlers/ping").suppress_middleware(),
        RouteSpec::new("GET", "/todo").manager("handlers/todo.list"),
        RouteSpec::new("POST", "/todo")
            .manager("handlers/todo.create")
            .append_middleware(&["middleware/auth"]),
        RouteSpec::new("GET", "/todo/{id}")
            .handler("handlers/todo.fetch")
            .validate("handlers/todo.fetch_schema"),
    ];
    config
}

/// Modules served by the demo configuration.
fn demo_registry() -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();

    registry.register("handlers/ping", Module::from_handler(|_request| async { "pong" }));

    registry.register(
        "handlers/todo",
        Module::builder()
            .manager(
                "list",
                RequestSchema::new().query(json!({
                    "type": "object",
                    "properties": {
                        "limit": { "type": "integer", "minimum": 1, "maximum": 100 },
                        "done": { "type": "boolean" }
                    },
                    "additionalProperties": false
                })),
                |request| async move {
                    let input = validated(&request);
                    Json(json!({ "todos": [], "query": input.query }))
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
                    let input = validated(&request);
                    (StatusCode::CREATED, Json(json!({ "created": input.body })))
                },
            )
            .handler("fetch", |request| async move {
                let input = validated(&request);
                Json(json!({ "todo": { "id": input.params["id"] } }))
            })
            .schema(
                "fetch_schema",
                RequestSchema::new().params(json!({
                    "type": "object",
                    "properties": { "id": { "type": "integer", "minimum": 1 } },
                    "required": ["id"]
                })),
            )
            .finish(),
    );

    registry.register(
        "middleware/trace",
        Module::from_middleware(|request| async move {
            tracing::debug!(
                method = %request.method(),
                path = request.uri().path(),
                "Handling request"
            );
            Flow::Continue(request)
        }),
    );

    registry.register(
        "middleware/auth",
        Module::from_middleware(|request| async move {
            match request.headers().get("x-api-key") {
                Some(key) if key == "demo" => Flow::Continue(request),
                _ => Flow::respond((StatusCode::UNAUTHORIZED, "Missing or invalid API key")),
            }
        }),
    );

    registry
}

/// The verdict of the validation stage, empty for unvalidated routes.
fn validated(request: &axum::extract::Request) -> ValidatedInput {
    request.extensions().get::<ValidatedInput>().cloned().unwrap_or_default()
}
