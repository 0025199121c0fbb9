//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Resolve the configured route table against the module registry
//! - Wire up middleware (tracing, timeout, body limit, request ID)
//! - Bind server to listener and serve until shutdown
//!
//! # Design Decisions
//! - Route resolution happens in `new`: a server that constructs at all
//!   will serve every configured route
//! - Graceful shutdown on Ctrl+C; in-flight requests drain first

use std::future::Future;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::http::request_id::{propagate_request_id, set_request_id};
use crate::registry::{ModuleRegistry, Resolver};
use crate::routing::{attach, LoaderError};

/// HTTP server carrying a fully resolved route table.
pub struct AppServer {
    router: Router,
    config: AppConfig,
}

impl AppServer {
    /// Resolve `config` against `registry` and build the server.
    pub fn new(config: AppConfig, registry: ModuleRegistry) -> Result<Self, LoaderError> {
        let resolver = Resolver::new(registry);
        let router = attach(&config, &resolver, Router::new())?;
        let router = apply_layers(router, &config);
        Ok(Self { router, config })
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        self.run_until(listener, shutdown_signal()).await
    }

    /// Run the server until `signal` resolves. In-flight requests drain
    /// before this returns.
    pub async fn run_until(
        self,
        listener: TcpListener,
        signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(signal)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The assembled router, for driving requests without a listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

impl std::fmt::Debug for AppServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServer")
            .field("bind_address", &self.config.server.bind_address)
            .field("routes", &self.config.routing.routes.len())
            .finish()
    }
}

/// Middleware stack around the route table. The last layer added runs
/// first, so request IDs are stamped before tracing spans open.
fn apply_layers(router: Router, config: &AppConfig) -> Router {
    router
        .layer(TimeoutLayer::new(Duration::from_secs(config.server.request_timeout_secs)))
        .layer(RequestBodyLimitLayer::new(config.server.max_body_bytes))
        .layer(propagate_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(set_request_id())
}

/// Wait for shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received");
}
