//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware layers)
//!     → request_id.rs (stamp and propagate x-request-id)
//!     → [routing layer dispatches to a RouteChain]
//!     → Send to client
//! ```

pub mod request_id;
pub mod server;

pub use request_id::{propagate_request_id, set_request_id, UuidRequestId, X_REQUEST_ID};
pub use server::AppServer;
