//! Mapping of engine errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::{EngineError, ErrorClass};

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    class: ErrorClass,
}

/// Handler error: any [`EngineError`], rendered by class.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

pub fn status_for(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::Validation => StatusCode::BAD_REQUEST,
        ErrorClass::NotFound => StatusCode::NOT_FOUND,
        ErrorClass::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorClass::Forbidden => StatusCode::FORBIDDEN,
        ErrorClass::Conflict | ErrorClass::State => StatusCode::CONFLICT,
        ErrorClass::TransientExternal => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let class = self.0.class();
        let status = status_for(class);
        if status.is_server_error() {
            tracing::warn!(error = %self.0, "Request failed on an external dependency");
        } else {
            tracing::debug!(error = %self.0, status = status.as_u16(), "Request rejected");
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
                class,
            }),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_by_class() {
        let status = |e: EngineError| ApiError(e).into_response().status();
        assert_eq!(status(EngineError::validation("bad")), StatusCode::BAD_REQUEST);
        assert_eq!(status(EngineError::not_found("sale", "x")), StatusCode::NOT_FOUND);
        assert_eq!(status(EngineError::SaleExhausted), StatusCode::CONFLICT);
        assert_eq!(status(EngineError::Unauthenticated), StatusCode::UNAUTHORIZED);
        assert_eq!(status(EngineError::forbidden("not yours")), StatusCode::FORBIDDEN);
        assert_eq!(
            status(EngineError::TransientExternal("rpc".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
