//! In-process module model for route wiring.
//!
//! # Responsibilities
//! - Define the `Export` tree: the values a dotted reference can reach
//!   (handlers, middlewares, request schemas, and nested groups).
//! - Provide `Module` and `ModuleBuilder` so applications can assemble
//!   export trees from plain async functions without boxing by hand.
//!
//! # Design Decisions
//! - Handlers and middlewares are type-erased into `Arc<dyn Fn>` returning
//!   boxed futures. Route tables hold heterogeneous functions, so erasure
//!   happens once here instead of at every call site.
//! - A middleware decides the flow itself: it either hands the (possibly
//!   rewritten) request to the next stage or short-circuits with a response.
//!   There is no shared mutable context object.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;

use crate::validation::RequestSchema;

/// Outcome of one middleware stage.
pub enum Flow {
    /// Continue to the next stage with this request.
    Continue(Request),
    /// Stop the chain and send this response.
    Respond(Response),
}

impl Flow {
    /// Short-circuit the chain with anything that converts into a response.
    pub fn respond(response: impl IntoResponse) -> Self {
        Flow::Respond(response.into_response())
    }
}

/// Type-erased terminal handler.
pub type HandlerFn = Arc<dyn Fn(Request) -> BoxFuture<'static, Response> + Send + Sync>;

/// Type-erased middleware stage.
pub type MiddlewareFn = Arc<dyn Fn(Request) -> BoxFuture<'static, Flow> + Send + Sync>;

/// A value reachable through a dotted reference.
#[derive(Clone)]
pub enum Export {
    /// Terminal request handler.
    Handler(HandlerFn),
    /// Chain stage that may rewrite the request or short-circuit.
    Middleware(MiddlewareFn),
    /// Request schema consumed by the validation stage.
    Schema(RequestSchema),
    /// Named sub-exports, descended into one dotted key at a time.
    Group(HashMap<String, Export>),
}

impl Export {
    /// Human-readable kind, used in resolution errors and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Export::Handler(_) => "handler",
            Export::Middleware(_) => "middleware",
            Export::Schema(_) => "schema",
            Export::Group(_) => "group",
        }
    }
}

impl std::fmt::Debug for Export {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Export::Group(entries) => {
                let mut keys: Vec<&str> = entries.keys().map(String::as_str).collect();
                keys.sort_unstable();
                f.debug_struct("Group").field("keys", &keys).finish()
            }
            other => f.write_str(other.kind()),
        }
    }
}

/// A registered unit of functionality, addressed by its registry path.
///
/// The root export is what a bare reference (no dotted keys) resolves to.
#[derive(Clone, Debug)]
pub struct Module {
    pub(crate) root: Export,
}

impl Module {
    /// Start building a module whose root is a group of named exports.
    pub fn builder() -> ModuleBuilder {
        ModuleBuilder { entries: HashMap::new() }
    }

    /// Module whose root is a single handler.
    pub fn from_handler<F, Fut, R>(handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse,
    {
        Module { root: Export::Handler(erase_handler(handler)) }
    }

    /// Module whose root is a single middleware.
    pub fn from_middleware<F, Fut>(middleware: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Flow> + Send + 'static,
    {
        Module { root: Export::Middleware(erase_middleware(middleware)) }
    }

    /// Module whose root is a managed endpoint: a `validate` schema next to
    /// a `handler`, expanded by the assembler when the route names no handler
    /// key explicitly.
    pub fn manager<F, Fut, R>(schema: RequestSchema, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse,
    {
        Module::builder().schema("validate", schema).handler("handler", handler).finish()
    }
}

/// Builder for group-rooted modules.
pub struct ModuleBuilder {
    entries: HashMap<String, Export>,
}

impl ModuleBuilder {
    /// Add a named handler export.
    pub fn handler<F, Fut, R>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse,
    {
        self.entries.insert(name.to_string(), Export::Handler(erase_handler(handler)));
        self
    }

    /// Add a named middleware export.
    pub fn middleware<F, Fut>(mut self, name: &str, middleware: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Flow> + Send + 'static,
    {
        self.entries.insert(name.to_string(), Export::Middleware(erase_middleware(middleware)));
        self
    }

    /// Add a named request schema export.
    pub fn schema(mut self, name: &str, schema: RequestSchema) -> Self {
        self.entries.insert(name.to_string(), Export::Schema(schema));
        self
    }

    /// Add a nested group built by `build`.
    pub fn group(mut self, name: &str, build: impl FnOnce(ModuleBuilder) -> ModuleBuilder) -> Self {
        let inner = build(Module::builder());
        self.entries.insert(name.to_string(), Export::Group(inner.entries));
        self
    }

    /// Add a managed endpoint group (`validate` schema plus `handler`).
    pub fn manager<F, Fut, R>(self, name: &str, schema: RequestSchema, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse,
    {
        self.group(name, |g| g.schema("validate", schema).handler("handler", handler))
    }

    pub fn finish(self) -> Module {
        Module { root: Export::Group(self.entries) }
    }
}

fn erase_handler<F, Fut, R>(handler: F) -> HandlerFn
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse,
{
    Arc::new(move |request| {
        let fut = handler(request);
        Box::pin(async move { fut.await.into_response() })
    })
}

fn erase_middleware<F, Fut>(middleware: F) -> MiddlewareFn
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Flow> + Send + 'static,
{
    Arc::new(move |request| Box::pin(middleware(request)))
}
