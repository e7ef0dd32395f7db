//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper auto builder, graceful drain, deadline abort)
//!     → request.rs (request ID, metrics)
//!     → handlers.rs (Axum router)
//!     → Send to client
//! ```

pub mod handlers;
pub mod request;
pub mod server;

pub use handlers::{build_router, with_middleware};
pub use request::{MakeRequestUuidV4, X_REQUEST_ID};
pub use server::HttpServer;
