//! Route table assembly.
//!
//! # Data Flow
//! ```text
//! AppConfig (validated route table)
//!     → resolve_routes: compose middleware refs, expand managers,
//!       resolve every ref, compile schemas
//!     → Vec<ResolvedRoute> (immutable records, all-or-nothing)
//!     → attach: register each route on an axum Router and install the
//!       validation error translator
//! ```
//!
//! # Design Decisions
//! - Resolution is all-or-nothing: the first bad ref aborts the whole
//!   attach, so a server never starts with a partial route table
//! - Route specs are never mutated; manager expansion produces new refs in
//!   the resolved record
//! - Ref kinds are checked at attach time: a handler ref must reach a
//!   handler export, middleware a middleware, validate a schema

use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, on, MethodFilter, MethodRouter};
use axum::{Json, Router};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::chain::RouteChain;
use crate::config::schema::{AppConfig, MiddlewareOverride, RouteSpec};
use crate::config::validation::{validate_config, ValidationError};
use crate::observability::metrics;
use crate::registry::{Export, HandlerFn, MiddlewareFn, ResolveError, Resolver};
use crate::validation::{CompiledSchema, SchemaCompileError, ValidationReport};

/// Why a route table could not be loaded.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("configuration invalid: {}", join_errors(.0))]
    Config(Vec<ValidationError>),

    #[error("route {method} {path}: {source}")]
    Resolve {
        method: String,
        path: String,
        #[source]
        source: ResolveError,
    },

    #[error("route {method} {path}: `{reference}` is a {found} export, expected a {expected}")]
    WrongKind {
        method: String,
        path: String,
        reference: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("validate object not found in `{reference}.validate`")]
    ManagerValidate { reference: String },

    #[error("handler function not found in `{reference}.handler`")]
    ManagerHandler { reference: String },

    #[error("route {method} {path}: {source}")]
    Schema {
        method: String,
        path: String,
        #[source]
        source: SchemaCompileError,
    },

    #[error("route {method} {path}: no handler or manager ref")]
    IncompleteRoute { method: String, path: String },
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// One route after composition, expansion and resolution. Immutable; the
/// spec it came from is left untouched.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    /// Lowercased method (`any`/`all` kept as written).
    pub method: String,
    pub path: String,
    /// Handler ref after manager expansion.
    pub handler_ref: String,
    /// Schema ref after manager expansion, if the route validates.
    pub validate_ref: Option<String>,
    /// Middleware refs in execution order.
    pub middleware_refs: Vec<String>,
    chain: Arc<RouteChain>,
}

impl ResolvedRoute {
    fn method_router(&self) -> MethodRouter {
        let chain = self.chain.clone();
        let handler = move |request: Request| {
            let chain = chain.clone();
            async move { chain.execute(request).await }
        };
        match method_filter(&self.method) {
            Some(filter) => on(filter, handler),
            None => any(handler),
        }
    }
}

/// Validate the configuration, resolve every route and register them all
/// on the given router with the validation error translator installed.
pub fn attach(config: &AppConfig, resolver: &Resolver, app: Router) -> Result<Router, LoaderError> {
    validate_config(config).map_err(LoaderError::Config)?;

    info!(total = config.routing.routes.len(), "Loading routes");
    let start = Instant::now();

    let resolved = resolve_routes(config, resolver)?;

    let mut router = app;
    for route in &resolved {
        router = router.route(&route.path, route.method_router());
        info!(
            method = %route.method,
            path = %route.path,
            handler = %route.handler_ref,
            validate = route.validate_ref.as_deref().unwrap_or("-"),
            middlewares = %route.middleware_refs.join(" "),
            "Route attached"
        );
    }
    let router = router.layer(middleware::from_fn(translate_validation_errors));

    metrics::record_routes_registered(resolved.len());
    debug!(
        total = resolved.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Routes loaded"
    );
    Ok(router)
}

/// Resolve the whole route table without registering anything.
///
/// Assumes the configuration already passed [`validate_config`]; `attach`
/// is the checked entry point.
pub fn resolve_routes(
    config: &AppConfig,
    resolver: &Resolver,
) -> Result<Vec<ResolvedRoute>, LoaderError> {
    let mut resolved = Vec::with_capacity(config.routing.routes.len());
    for route in &config.routing.routes {
        resolved.push(resolve_route(config, route, resolver)?);
    }
    Ok(resolved)
}

fn resolve_route(
    config: &AppConfig,
    route: &RouteSpec,
    resolver: &Resolver,
) -> Result<ResolvedRoute, LoaderError> {
    if route.prepend_middleware.is_some() {
        warn!(
            method = %route.method,
            path = %route.path,
            "prepend_middleware is not applied; order global.middleware or use append_middleware"
        );
    }

    let middleware_refs = compose_middleware(config, route);

    let (handler_ref, validate_ref) = match &route.manager {
        Some(manager) => {
            debug!(path = %route.path, manager = %manager, "Expanding manager ref");
            match resolve(resolver, manager, route)? {
                Export::Group(entries) => {
                    if !entries.contains_key("validate") {
                        return Err(LoaderError::ManagerValidate { reference: manager.clone() });
                    }
                    if !entries.contains_key("handler") {
                        return Err(LoaderError::ManagerHandler { reference: manager.clone() });
                    }
                }
                other => {
                    return Err(wrong_kind(route, manager, "group", &other));
                }
            }
            (format!("{manager}.handler"), Some(format!("{manager}.validate")))
        }
        None => match &route.handler {
            Some(handler) => (handler.clone(), route.validate.clone()),
            None => {
                return Err(LoaderError::IncompleteRoute {
                    method: route.method.clone(),
                    path: route.path.clone(),
                })
            }
        },
    };

    let handler = expect_handler(resolver, &handler_ref, route)?;
    let schema = match &validate_ref {
        Some(reference) => expect_schema(resolver, reference, route)?,
        None => None,
    };
    let middlewares = middleware_refs
        .iter()
        .map(|reference| expect_middleware(resolver, reference, route))
        .collect::<Result<Vec<_>, _>>()?;

    let chain = RouteChain::new(
        &route.method,
        &route.path,
        middlewares,
        schema,
        handler,
        config.server.max_body_bytes,
    );
    Ok(ResolvedRoute {
        method: route.method.to_lowercase(),
        path: route.path.clone(),
        handler_ref,
        validate_ref,
        middleware_refs,
        chain: Arc::new(chain),
    })
}

/// The inherited global list, overridden or extended per route. An
/// `append_middleware` key wins over a `middleware` override when a route
/// carries both.
fn compose_middleware(config: &AppConfig, route: &RouteSpec) -> Vec<String> {
    let mut refs: Vec<String> = config
        .routing
        .global
        .middleware
        .as_refs()
        .iter()
        .map(|r| (*r).to_string())
        .collect();

    if let Some(append) = &route.append_middleware {
        debug!(path = %route.path, "Appending middleware to the inherited list");
        refs.extend(append.as_refs().iter().map(|r| (*r).to_string()));
    } else {
        match &route.middleware {
            MiddlewareOverride::Inherit => {}
            MiddlewareOverride::Suppress => refs.clear(),
            MiddlewareOverride::Replace(replacement) => refs = replacement.clone(),
        }
    }
    refs
}

fn resolve(resolver: &Resolver, reference: &str, route: &RouteSpec) -> Result<Export, LoaderError> {
    resolver.resolve(reference).map_err(|source| LoaderError::Resolve {
        method: route.method.clone(),
        path: route.path.clone(),
        source,
    })
}

fn wrong_kind(
    route: &RouteSpec,
    reference: &str,
    expected: &'static str,
    found: &Export,
) -> LoaderError {
    LoaderError::WrongKind {
        method: route.method.clone(),
        path: route.path.clone(),
        reference: reference.to_string(),
        expected,
        found: found.kind(),
    }
}

fn expect_handler(
    resolver: &Resolver,
    reference: &str,
    route: &RouteSpec,
) -> Result<HandlerFn, LoaderError> {
    match resolve(resolver, reference, route)? {
        Export::Handler(handler) => Ok(handler),
        other => Err(wrong_kind(route, reference, "handler", &other)),
    }
}

fn expect_middleware(
    resolver: &Resolver,
    reference: &str,
    route: &RouteSpec,
) -> Result<MiddlewareFn, LoaderError> {
    match resolve(resolver, reference, route)? {
        Export::Middleware(middleware) => Ok(middleware),
        other => Err(wrong_kind(route, reference, "middleware", &other)),
    }
}

fn expect_schema(
    resolver: &Resolver,
    reference: &str,
    route: &RouteSpec,
) -> Result<Option<CompiledSchema>, LoaderError> {
    let schema = match resolve(resolver, reference, route)? {
        Export::Schema(schema) => schema,
        other => return Err(wrong_kind(route, reference, "schema", &other)),
    };
    let compiled = CompiledSchema::compile(&schema).map_err(|source| LoaderError::Schema {
        method: route.method.clone(),
        path: route.path.clone(),
        source,
    })?;
    Ok((!compiled.is_empty()).then_some(compiled))
}

fn method_filter(lowercase: &str) -> Option<MethodFilter> {
    match lowercase {
        "get" => Some(MethodFilter::GET),
        "post" => Some(MethodFilter::POST),
        "put" => Some(MethodFilter::PUT),
        "delete" => Some(MethodFilter::DELETE),
        "patch" => Some(MethodFilter::PATCH),
        "head" => Some(MethodFilter::HEAD),
        "options" => Some(MethodFilter::OPTIONS),
        "trace" => Some(MethodFilter::TRACE),
        // any / all: every method matches
        _ => None,
    }
}

/// Render a validation failure carried as a response extension into the
/// client-facing JSON body. Installed once per attached router.
pub(crate) async fn translate_validation_errors(request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    if let Some(report) = response.extensions().get::<ValidationReport>().cloned() {
        return (StatusCode::BAD_REQUEST, Json(report.to_body())).into_response();
    }
    response
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::config::schema::RouteSpec;
    use crate::registry::{Flow, Module, ModuleRegistry};
    use crate::validation::RequestSchema;

    fn demo_registry() -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        registry.register("demo/ping", Module::from_handler(|_req| async { "pong" }));
        registry.register(
            "demo/todo",
            Module::builder()
                .handler("list", |_req| async { "list" })
                .group("inner", |g| g.handler("again", |_req| async { "deep" }))
                .finish(),
        );
        registry.register(
            "demo/auth",
            Module::from_middleware(|req| async move { Flow::Continue(req) }),
        );
        registry.register(
            "demo/managed",
            Module::manager(
                RequestSchema::new().query(json!({
                    "type": "object",
                    "properties": { "limit": { "type": "integer", "maximum": 10 } },
                    "required": ["limit"],
                    "additionalProperties": false
                })),
                |_req| async { "managed" },
            ),
        );
        registry.register(
            "demo/half-managed",
            Module::builder().handler("handler", |_req| async { "x" }).finish(),
        );
        registry
    }

    fn resolver() -> Resolver {
        Resolver::new(demo_registry())
    }

    fn config_for(routes: Vec<RouteSpec>) -> AppConfig {
        let mut config = AppConfig::default();
        config.routing.routes = routes;
        config
    }

    #[test]
    fn resolves_bare_dotted_and_nested_refs() {
        let config = config_for(vec![
            RouteSpec::new("GET", "/ping").handler("demo/ping"),
            RouteSpec::new("GET", "/list").handler("./demo/todo.list"),
            RouteSpec::new("GET", "/deep").handler("/demo/todo.inner.again"),
        ]);
        let resolved = resolve_routes(&config, &resolver()).unwrap();
        assert_eq!(resolved.len(), 3);
        assert_eq!(resolved[2].handler_ref, "/demo/todo.inner.again");
    }

    #[test]
    fn missing_modules_and_keys_abort_resolution() {
        let config = config_for(vec![RouteSpec::new("GET", "/x").handler("demo/absent")]);
        let err = resolve_routes(&config, &resolver()).unwrap_err();
        assert!(matches!(
            err,
            LoaderError::Resolve { source: ResolveError::ModuleNotFound { .. }, .. }
        ));

        let config = config_for(vec![RouteSpec::new("GET", "/x").handler("demo/todo.nope")]);
        let err = resolve_routes(&config, &resolver()).unwrap_err();
        assert!(matches!(
            err,
            LoaderError::Resolve { source: ResolveError::KeyNotFound { .. }, .. }
        ));
    }

    #[test]
    fn ref_kinds_are_enforced() {
        // A middleware ref where a handler belongs.
        let config = config_for(vec![RouteSpec::new("GET", "/x").handler("demo/auth")]);
        let err = resolve_routes(&config, &resolver()).unwrap_err();
        match err {
            LoaderError::WrongKind { expected, found, .. } => {
                assert_eq!(expected, "handler");
                assert_eq!(found, "middleware");
            }
            other => panic!("expected WrongKind, got {other}"),
        }

        // A handler ref where a middleware belongs.
        let config = config_for(vec![RouteSpec::new("GET", "/x")
            .handler("demo/ping")
            .middleware(&["demo/todo.list"])]);
        assert!(matches!(
            resolve_routes(&config, &resolver()).unwrap_err(),
            LoaderError::WrongKind { .. }
        ));
    }

    #[test]
    fn manager_refs_expand_to_validate_and_handler() {
        let config = config_for(vec![RouteSpec::new("GET", "/todo").manager("demo/managed")]);
        let resolved = resolve_routes(&config, &resolver()).unwrap();
        assert_eq!(resolved[0].handler_ref, "demo/managed.handler");
        assert_eq!(resolved[0].validate_ref.as_deref(), Some("demo/managed.validate"));
    }

    #[test]
    fn manager_without_validate_names_the_missing_key() {
        let config = config_for(vec![RouteSpec::new("GET", "/x").manager("demo/half-managed")]);
        let err = resolve_routes(&config, &resolver()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "validate object not found in `demo/half-managed.validate`"
        );
    }

    #[test]
    fn manager_must_reach_a_group() {
        let config = config_for(vec![RouteSpec::new("GET", "/x").manager("demo/ping")]);
        let err = resolve_routes(&config, &resolver()).unwrap_err();
        assert!(matches!(err, LoaderError::WrongKind { expected: "group", .. }));
    }

    #[test]
    fn middleware_composition_follows_override_rules() {
        let mut config = config_for(vec![
            RouteSpec::new("GET", "/inherit").handler("demo/ping"),
            RouteSpec::new("GET", "/replace").handler("demo/ping").middleware(&["demo/auth"]),
            RouteSpec::new("GET", "/suppress").handler("demo/ping").suppress_middleware(),
            RouteSpec::new("GET", "/append")
                .handler("demo/ping")
                .append_middleware(&["demo/auth"]),
            RouteSpec::new("GET", "/append-wins")
                .handler("demo/ping")
                .suppress_middleware()
                .append_middleware(&["demo/auth"]),
        ]);
        config.routing.global.middleware = crate::config::RefList::One("demo/auth".to_string());

        let resolved = resolve_routes(&config, &resolver()).unwrap();
        assert_eq!(resolved[0].middleware_refs, vec!["demo/auth"]);
        assert_eq!(resolved[1].middleware_refs, vec!["demo/auth"]);
        assert!(resolved[2].middleware_refs.is_empty());
        assert_eq!(resolved[3].middleware_refs, vec!["demo/auth", "demo/auth"]);
        assert_eq!(resolved[4].middleware_refs, vec!["demo/auth", "demo/auth"]);
    }

    #[test]
    fn attach_rejects_invalid_configs_before_resolving() {
        let config = config_for(vec![RouteSpec::new("GET", "no-slash").handler("demo/absent")]);
        let err = attach(&config, &resolver(), Router::new()).unwrap_err();
        assert!(matches!(err, LoaderError::Config(_)));
    }

    #[test]
    fn conflicting_capture_names_fail_attach_without_touching_the_router() {
        // Both paths validate alone; together they collide on the capture
        // segment and the router must never see either.
        let config = config_for(vec![
            RouteSpec::new("GET", "/todo/{id}").handler("demo/ping"),
            RouteSpec::new("POST", "/todo/{tid}").handler("demo/ping"),
        ]);
        let err = attach(&config, &resolver(), Router::new()).unwrap_err();
        assert!(matches!(err, LoaderError::Config(_)));
    }

    #[tokio::test]
    async fn attached_routes_serve_requests() {
        let config = config_for(vec![RouteSpec::new("GET", "/ping").handler("demo/ping")]);
        let router = attach(&config, &resolver(), Router::new()).unwrap();

        let response = router
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"pong");
    }

    #[tokio::test]
    async fn validation_failures_serve_the_translated_body() {
        let config = config_for(vec![RouteSpec::new("GET", "/todo").manager("demo/managed")]);
        let router = attach(&config, &resolver(), Router::new()).unwrap();

        let response = router
            .oneshot(Request::builder().uri("/todo?limit=11").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["statusCode"], 400);
        assert_eq!(body["error"], "Bad Request");
        assert_eq!(body["validation"]["query"]["keys"][0], "limit");
    }

    #[tokio::test]
    async fn any_routes_match_every_method() {
        let config = config_for(vec![RouteSpec::new("ANY", "/ping").handler("demo/ping")]);
        let router = attach(&config, &resolver(), Router::new()).unwrap();

        for method in ["GET", "POST", "DELETE"] {
            let response = router
                .clone()
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri("/ping")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{method} should match");
        }
    }
}
