//! HTTP surface.
//!
//! # Data Flow
//! ```text
//! request
//!     → server.rs (request id, trace, timeout layers)
//!     → request.rs (viewer identity from X-Viewer-Id)
//!     → handlers.rs / admin (one engine operation per route)
//!     → error.rs (EngineError class → 400/404/409/503)
//! ```

pub mod error;
pub mod handlers;
pub mod request;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use request::{Viewer, X_REQUEST_ID, X_VIEWER_ID};
pub use server::{build_router, AppState, HttpServer};
