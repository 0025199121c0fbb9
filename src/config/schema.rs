//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server:
//! the listener and ambient HTTP settings, observability, and the declarative
//! route table that the assembler turns into live endpoints. All types derive
//! Serde traits for deserialization from config files.

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address, timeouts, body limit).
    pub server: ServerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Route table and global middleware.
    #[serde(flatten)]
    pub routing: RoutesConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Request timeout (total time for request/response) in seconds.
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// The declarative route table.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RoutesConfig {
    /// Settings every route inherits.
    pub global: GlobalConfig,

    /// Route definitions, attached in order.
    pub routes: Vec<RouteSpec>,
}

/// Settings applied to every route unless overridden per route.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GlobalConfig {
    /// Middleware refs prepended to every route's chain.
    pub middleware: RefList,
}

/// One route definition.
///
/// Exactly one of `handler` or `manager` names the endpoint. A `manager`
/// ref expands to `<manager>.validate` and `<manager>.handler` and cannot
/// be combined with either explicit key.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteSpec {
    /// Route path (e.g., "/todo" or "/todo/{id}").
    pub path: String,

    /// HTTP method, case-insensitive. `any`/`all` match every method.
    pub method: String,

    /// Handler ref.
    #[serde(default)]
    pub handler: Option<String>,

    /// Request schema ref.
    #[serde(default)]
    pub validate: Option<String>,

    /// Managed endpoint ref (expands to `.validate` and `.handler`).
    #[serde(default)]
    pub manager: Option<String>,

    /// Middleware override: replaces the inherited global list, or
    /// suppresses it entirely (explicit `null`, or an empty list).
    #[serde(default)]
    pub middleware: MiddlewareOverride,

    /// Middleware refs appended after the global list. When present, the
    /// `middleware` override is ignored.
    #[serde(default)]
    pub append_middleware: Option<RefList>,

    /// Accepted for compatibility; never applied. Use `global.middleware`
    /// ordering or `append_middleware` instead.
    #[serde(default)]
    pub prepend_middleware: Option<RefList>,
}

impl RouteSpec {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            path: path.to_string(),
            method: method.to_string(),
            handler: None,
            validate: None,
            manager: None,
            middleware: MiddlewareOverride::Inherit,
            append_middleware: None,
            prepend_middleware: None,
        }
    }

    pub fn handler(mut self, reference: &str) -> Self {
        self.handler = Some(reference.to_string());
        self
    }

    pub fn validate(mut self, reference: &str) -> Self {
        self.validate = Some(reference.to_string());
        self
    }

    pub fn manager(mut self, reference: &str) -> Self {
        self.manager = Some(reference.to_string());
        self
    }

    pub fn middleware(mut self, refs: &[&str]) -> Self {
        self.middleware =
            MiddlewareOverride::Replace(refs.iter().map(|r| (*r).to_string()).collect());
        self
    }

    pub fn suppress_middleware(mut self) -> Self {
        self.middleware = MiddlewareOverride::Suppress;
        self
    }

    pub fn append_middleware(mut self, refs: &[&str]) -> Self {
        self.append_middleware =
            Some(RefList::Many(refs.iter().map(|r| (*r).to_string()).collect()));
        self
    }

    pub fn prepend_middleware(mut self, refs: &[&str]) -> Self {
        self.prepend_middleware =
            Some(RefList::Many(refs.iter().map(|r| (*r).to_string()).collect()));
        self
    }
}

/// One ref or a list of refs. Config files may write either form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RefList {
    One(String),
    Many(Vec<String>),
}

impl RefList {
    pub fn as_refs(&self) -> Vec<&str> {
        match self {
            RefList::One(reference) => vec![reference.as_str()],
            RefList::Many(refs) => refs.iter().map(String::as_str).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RefList::One(_) => 1,
            RefList::Many(refs) => refs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RefList {
    fn default() -> Self {
        RefList::Many(Vec::new())
    }
}

/// Per-route middleware override.
///
/// Distinguishes a missing `middleware` key (inherit the global list) from
/// an explicit `null` or empty list (run no inherited middleware). TOML has
/// no `null`, so TOML configs write `middleware = []` to suppress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MiddlewareOverride {
    /// Key absent: the route inherits the global middleware list.
    #[default]
    Inherit,
    /// Explicit `null` or empty list: the route runs no inherited middleware.
    Suppress,
    /// Replace the global list with these refs.
    Replace(Vec<String>),
}

impl<'de> Deserialize<'de> for MiddlewareOverride {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<RefList>::deserialize(deserializer)?;
        Ok(match raw {
            None => MiddlewareOverride::Suppress,
            Some(list) if list.is_empty() => MiddlewareOverride::Suppress,
            Some(list) => {
                MiddlewareOverride::Replace(list.as_refs().iter().map(|r| (*r).to_string()).collect())
            }
        })
    }
}

impl Serialize for MiddlewareOverride {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            MiddlewareOverride::Inherit => serializer.serialize_none(),
            MiddlewareOverride::Suppress => Vec::<String>::new().serialize(serializer),
            MiddlewareOverride::Replace(refs) => refs.serialize(serializer),
        }
    }
}
