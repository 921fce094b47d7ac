//! Admin API.
//!
//! Bearer-key protected routes for content and payee registration, flash sale
//! management, one-shot settlement checks and engine status. Used by
//! `engine-cli`.

pub mod auth;
pub mod handlers;

use axum::routing::{get, post, put};
use axum::{middleware, Router};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/content", put(upsert_content))
        .route("/admin/payees", put(upsert_payee))
        .route("/admin/sales", post(create_sale))
        .route("/admin/sales/{id}", get(get_sale))
        .route("/admin/sales/{id}/deactivate", post(deactivate_sale))
        .route("/admin/settlements/verify", post(verify_settlement))
        .route("/admin/audit/{proof_ref}", get(get_audit))
        .route("/admin/price/refresh", post(refresh_price))
        .layer(middleware::from_fn_with_state(state, admin_auth_middleware))
}
