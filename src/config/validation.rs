//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check route shape: every route names a handler or a manager, never a
//!   manager combined with explicit handler/validate keys
//! - Validate paths and methods before the router sees them, so malformed
//!   definitions fail here instead of panicking inside the router
//! - Detect conflicting routes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::AppConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("server.bind_address `{address}` is not a valid socket address")]
    BindAddress { address: String },

    #[error("observability.metrics_address `{address}` is not a valid socket address")]
    MetricsAddress { address: String },

    #[error("server.request_timeout_secs must be greater than zero")]
    ZeroTimeout,

    #[error("server.max_body_bytes must be greater than zero")]
    ZeroBodyLimit,

    #[error("route {index} ({method} {path}): unsupported method")]
    UnsupportedMethod { index: usize, method: String, path: String },

    #[error("route {index}: path `{path}` must start with `/`")]
    PathMissingSlash { index: usize, path: String },

    #[error("route {index}: path `{path}` contains `{found}`")]
    PathBadCharacter { index: usize, path: String, found: char },

    #[error("route {index}: path `{path}` has an unbalanced or empty capture")]
    PathBadCapture { index: usize, path: String },

    #[error("route {index} ({method} {path}): no handler or manager ref")]
    MissingHandler { index: usize, method: String, path: String },

    #[error("route {index} ({method} {path}): manager with handler/validate on the same route, use manager only or validate and handler")]
    ManagerConflict { index: usize, method: String, path: String },

    #[error("route {index}: duplicate route {method} {path}")]
    DuplicateRoute { index: usize, method: String, path: String },

    #[error("route {index}: path `{path}` conflicts with `{other}`, capture names differ at the same position")]
    CaptureConflict { index: usize, path: String, other: String },
}

/// Every problem found in one validation pass.
pub type ValidationErrors = Vec<ValidationError>;

/// Check everything about a configuration that does not require the module
/// registry. Collects every problem instead of stopping at the first.
pub fn validate_config(config: &AppConfig) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress {
            address: config.server.bind_address.clone(),
        });
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress {
            address: config.observability.metrics_address.clone(),
        });
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout);
    }
    if config.server.max_body_bytes == 0 {
        errors.push(ValidationError::ZeroBodyLimit);
    }

    let mut methods_by_path: HashMap<&str, HashSet<String>> = HashMap::new();
    for (index, route) in config.routing.routes.iter().enumerate() {
        let method = route.method.to_lowercase();
        if !supported_method(&method) {
            errors.push(ValidationError::UnsupportedMethod {
                index,
                method: route.method.clone(),
                path: route.path.clone(),
            });
        }

        check_path(index, &route.path, &mut errors);

        if route.manager.is_some() && (route.handler.is_some() || route.validate.is_some()) {
            errors.push(ValidationError::ManagerConflict {
                index,
                method: route.method.clone(),
                path: route.path.clone(),
            });
        } else if route.manager.is_none() && route.handler.is_none() {
            errors.push(ValidationError::MissingHandler {
                index,
                method: route.method.clone(),
                path: route.path.clone(),
            });
        }

        if let Some(other) = config.routing.routes[..index]
            .iter()
            .map(|earlier| earlier.path.as_str())
            .find(|earlier| capture_conflict(earlier, &route.path))
        {
            errors.push(ValidationError::CaptureConflict {
                index,
                path: route.path.clone(),
                other: other.to_string(),
            });
        }

        let seen = methods_by_path.entry(route.path.as_str()).or_default();
        let matches_all = matches!(method.as_str(), "any" | "all");
        let seen_all = seen.contains("any") || seen.contains("all");
        if seen.contains(&method) || (!seen.is_empty() && (matches_all || seen_all)) {
            errors.push(ValidationError::DuplicateRoute {
                index,
                method: route.method.clone(),
                path: route.path.clone(),
            });
        }
        seen.insert(method);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Methods the router accepts. `any`/`all` match every method.
pub(crate) fn supported_method(lowercase: &str) -> bool {
    matches!(
        lowercase,
        "get" | "post" | "put" | "delete" | "patch" | "head" | "options" | "trace" | "any" | "all"
    )
}

fn check_path(index: usize, path: &str, errors: &mut Vec<ValidationError>) {
    if !path.starts_with('/') {
        errors.push(ValidationError::PathMissingSlash { index, path: path.to_string() });
        return;
    }
    for c in path.chars() {
        if c.is_whitespace() || c.is_control() || c == '#' || c == '?' {
            errors.push(ValidationError::PathBadCharacter {
                index,
                path: path.to_string(),
                found: c,
            });
            return;
        }
    }
    if !captures_balanced(path) {
        errors.push(ValidationError::PathBadCapture { index, path: path.to_string() });
    }
}

/// Every `{name}` capture must be non-empty and closed; `{{`/`}}` are
/// literal braces.
fn captures_balanced(path: &str) -> bool {
    let mut chars = path.chars().peekable();
    let mut open = false;
    let mut name_len = 0usize;
    while let Some(c) = chars.next() {
        match c {
            '{' => {
                if !open && chars.peek() == Some(&'{') {
                    chars.next();
                    continue;
                }
                if open {
                    return false;
                }
                open = true;
                name_len = 0;
            }
            '}' => {
                if !open {
                    if chars.peek() == Some(&'}') {
                        chars.next();
                        continue;
                    }
                    return false;
                }
                if name_len == 0 {
                    return false;
                }
                open = false;
            }
            _ if open => name_len += 1,
            _ => {}
        }
    }
    !open
}

/// Whether two distinct paths collide in the router. The router keys
/// capture segments by name, so `/todo/{id}` and `/todo/{tid}` cannot
/// coexist even on disjoint methods: the walk stops at the first segment
/// where the paths differ, and a difference confined to capture names is a
/// conflict.
fn capture_conflict(a: &str, b: &str) -> bool {
    for (seg_a, seg_b) in a.split('/').zip(b.split('/')) {
        if seg_a == seg_b {
            continue;
        }
        return erase_capture_names(seg_a) == erase_capture_names(seg_b);
    }
    false
}

/// `{name}` becomes `{}`; `{{`/`}}` stay literal.
fn erase_capture_names(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push_str("{{");
            }
            '{' => {
                for inner in chars.by_ref() {
                    if inner == '}' {
                        break;
                    }
                }
                out.push_str("{}");
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push_str("}}");
            }
            _ => out.push(c),
        }
    }
    out
}
