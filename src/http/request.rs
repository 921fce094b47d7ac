//! Request-scoped identity.
//!
//! # Design Decisions
//! - The session layer in front of the engine authenticates viewers and
//!   forwards the id in `X-Viewer-Id`; a missing or blank header is anonymous
//! - Routes that act for a user take the user from the viewer, never from
//!   the body, and anonymous callers get 401
//! - Request ids are set and propagated by tower-http layers in server.rs

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::convert::Infallible;

use crate::error::{EngineError, EngineResult};

pub const X_VIEWER_ID: &str = "x-viewer-id";
pub const X_REQUEST_ID: &str = "x-request-id";

/// The current viewer, or `None` for anonymous requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer(pub Option<String>);

impl Viewer {
    pub fn id(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// The viewer's id, or `Unauthenticated` for anonymous requests.
    pub fn require(&self) -> EngineResult<&str> {
        self.id().ok_or(EngineError::Unauthenticated)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Viewer {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let viewer = parts
            .headers
            .get(X_VIEWER_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        Ok(Viewer(viewer))
    }
}
