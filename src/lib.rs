//! Declarative Route Loader Library

pub mod config;
pub mod http;
pub mod observability;
pub mod registry;
pub mod routing;
pub mod validation;

pub use config::loader::load_config;
pub use config::AppConfig;
pub use http::AppServer;
pub use registry::{Export, Flow, Module, ModuleBuilder, ModuleRegistry, Resolver};
pub use routing::{attach, LoaderError, ResolvedRoute};
pub use validation::{RequestSchema, ValidatedInput};
