//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Assembly (at startup):
//!     AppConfig routes + ModuleRegistry
//!     → assembler.rs (compose middleware, expand managers, resolve refs)
//!     → chain.rs (one RouteChain per route)
//!     → Freeze as immutable axum Router
//!
//! Incoming Request:
//!     → RouteChain (middleware stages, then validation, then handler)
//!     → Return: handler Response, short-circuit, or translated 400
//! ```
//!
//! # Design Decisions
//! - Routes resolved and compiled at startup, immutable at runtime
//! - Resolution is all-or-nothing: a bad ref fails the whole table
//! - Method and path dispatch are delegated to axum's router

pub mod assembler;
pub mod chain;

pub use assembler::{attach, resolve_routes, LoaderError, ResolvedRoute};
pub use chain::RouteChain;
