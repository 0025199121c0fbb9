//! Module registration and dotted reference resolution.

pub mod module;
pub mod resolver;

pub use module::{Export, Flow, HandlerFn, MiddlewareFn, Module, ModuleBuilder};
pub use resolver::{ModuleRegistry, ResolveError, Resolver};
