//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML/JSON)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → routing::attach resolves refs and registers routes
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; route tables never mutate at runtime
//! - All ambient fields have defaults so a config can be routes-only
//! - Validation separates syntactic (serde) from semantic checks, and runs
//!   before any ref is resolved

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::load_config;
pub use loader::ConfigError;
pub use schema::AppConfig;
pub use schema::GlobalConfig;
pub use schema::MiddlewareOverride;
pub use schema::RefList;
pub use schema::RouteSpec;
pub use schema::RoutesConfig;
pub use schema::ServerConfig;
pub use validation::validate_config;
pub use validation::ValidationError;
pub use validation::ValidationErrors;
