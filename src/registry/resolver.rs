//! Dotted reference resolution over the module registry.
//!
//! # Responsibilities
//! - Parse references of the form `path/to/module.key.subkey` into a module
//!   path plus a chain of export keys.
//! - Load modules from the registry, running lazy initializers at most once
//!   and caching the built module for every later reference to the same path.
//! - Descend the export tree key by key and surface precise errors when a
//!   step fails.
//!
//! # Design Decisions
//! - `./x`, `/x` and `x` all name the same module. The leading locator is
//!   cosmetic in route files and normalizing it here keeps the cache keyed by
//!   one canonical spelling.
//! - Only the first dotted segment may contain `/`. A slash after the first
//!   dot is a malformed reference, not a lookup miss, and is rejected before
//!   any registry access.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

use super::module::{Export, Module};

/// Why a reference failed to resolve.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid ref `{reference}`: {reason}")]
    InvalidRef { reference: String, reason: &'static str },

    #[error("module `{module}` is not registered (ref `{reference}`)")]
    ModuleNotFound { reference: String, module: String },

    #[error("`{key}` is not defined in `{reference}`, make sure you entered the correct path/key")]
    KeyNotFound { reference: String, key: String },

    #[error("cannot descend into `{key}`: `{reference}` reaches a {kind} export, not a group")]
    NotDescendable { reference: String, key: String, kind: &'static str },
}

/// Parsed form of a dotted reference.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct RefPath {
    pub(crate) module: String,
    pub(crate) keys: Vec<String>,
}

impl RefPath {
    /// Split a raw reference into its module path and export keys.
    ///
    /// Normalization: surrounding whitespace is trimmed, a leading `./` or
    /// `/` is dropped, and a trailing `.rs` on the module segment is dropped.
    pub(crate) fn parse(raw: &str) -> Result<Self, ResolveError> {
        let invalid = |reason| ResolveError::InvalidRef { reference: raw.to_string(), reason };

        let mut rest = raw.trim();
        if rest.is_empty() {
            return Err(invalid("reference is empty"));
        }
        if let Some(stripped) = rest.strip_prefix("./") {
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix('/') {
            rest = stripped;
        }
        rest = rest.strip_suffix(".rs").unwrap_or(rest);

        let mut segments = rest.split('.');
        let module = segments.next().unwrap_or("");
        if module.is_empty() {
            return Err(invalid("reference names no module path"));
        }
        let keys: Vec<String> = segments.map(str::to_string).collect();
        for key in &keys {
            if key.is_empty() {
                return Err(invalid("reference contains an empty key segment"));
            }
            if key.contains('/') {
                return Err(invalid("key segments must not contain `/`"));
            }
        }
        Ok(RefPath { module: module.to_string(), keys })
    }
}

/// Canonical registry spelling of a module path.
pub(crate) fn normalize_module_path(raw: &str) -> String {
    let mut rest = raw.trim();
    if let Some(stripped) = rest.strip_prefix("./") {
        rest = stripped;
    } else if let Some(stripped) = rest.strip_prefix('/') {
        rest = stripped;
    }
    rest.strip_suffix(".rs").unwrap_or(rest).to_string()
}

enum ModuleSlot {
    Ready(Arc<Module>),
    Lazy(Box<dyn Fn() -> Module + Send + Sync>),
}

/// The set of modules a resolver can reach, keyed by normalized path.
///
/// Registration happens in application code before the server starts, so
/// malformed paths are programmer errors and panic rather than returning
/// `Result` from every `register` call.
#[derive(Default)]
pub struct ModuleRegistry {
    slots: HashMap<String, ModuleSlot>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an already-built module under `path`.
    ///
    /// # Panics
    ///
    /// Panics if `path` normalizes to an empty string or contains `.`,
    /// which would make the module unaddressable through a reference.
    pub fn register(&mut self, path: &str, module: Module) -> &mut Self {
        let key = Self::checked_path(path);
        self.slots.insert(key, ModuleSlot::Ready(Arc::new(module)));
        self
    }

    /// Register a module built on first use. The initializer runs once; the
    /// built module is cached by the resolver for all later references.
    ///
    /// # Panics
    ///
    /// Same path rules as [`register`](Self::register).
    pub fn register_lazy(
        &mut self,
        path: &str,
        init: impl Fn() -> Module + Send + Sync + 'static,
    ) -> &mut Self {
        let key = Self::checked_path(path);
        self.slots.insert(key, ModuleSlot::Lazy(Box::new(init)));
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        self.slots.contains_key(&normalize_module_path(path))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn checked_path(path: &str) -> String {
        let key = normalize_module_path(path);
        assert!(!key.is_empty(), "module path `{path}` normalizes to an empty string");
        assert!(!key.contains('.'), "module path `{path}` must not contain `.`");
        key
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut paths: Vec<&str> = self.slots.keys().map(String::as_str).collect();
        paths.sort_unstable();
        f.debug_struct("ModuleRegistry").field("paths", &paths).finish()
    }
}

/// Resolves dotted references to exports, loading each module at most once.
pub struct Resolver {
    registry: ModuleRegistry,
    cache: DashMap<String, Arc<Module>>,
}

impl Resolver {
    pub fn new(registry: ModuleRegistry) -> Self {
        Self { registry, cache: DashMap::new() }
    }

    /// Resolve `reference` to the export it names.
    ///
    /// The returned export is a cheap clone: handlers and middlewares are
    /// reference-counted, so resolving the same reference twice yields
    /// exports backed by the same function.
    pub fn resolve(&self, reference: &str) -> Result<Export, ResolveError> {
        let path = RefPath::parse(reference)?;
        let module = self.load(&path.module, reference)?;

        let mut current = &module.root;
        for key in &path.keys {
            current = match current {
                Export::Group(entries) => entries.get(key).ok_or_else(|| ResolveError::KeyNotFound {
                    reference: reference.to_string(),
                    key: key.clone(),
                })?,
                other => {
                    return Err(ResolveError::NotDescendable {
                        reference: reference.to_string(),
                        key: key.clone(),
                        kind: other.kind(),
                    })
                }
            };
        }
        Ok(current.clone())
    }

    /// Number of distinct modules loaded so far.
    pub fn loaded_modules(&self) -> usize {
        self.cache.len()
    }

    fn load(&self, module_path: &str, reference: &str) -> Result<Arc<Module>, ResolveError> {
        if let Some(cached) = self.cache.get(module_path) {
            return Ok(cached.clone());
        }
        let slot = self.registry.slots.get(module_path).ok_or_else(|| ResolveError::ModuleNotFound {
            reference: reference.to_string(),
            module: module_path.to_string(),
        })?;
        let module = match slot {
            ModuleSlot::Ready(module) => module.clone(),
            // Startup resolution is single-threaded, so running the
            // initializer outside the cache lock still runs it once.
            ModuleSlot::Lazy(init) => Arc::new(init()),
        };
        Ok(self
            .cache
            .entry(module_path.to_string())
            .or_insert(module)
            .clone())
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("registry", &self.registry)
            .field("loaded", &self.cache.len())
            .finish()
    }
}
