//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with public and admin handlers
//! - Wire up middleware (tracing, timeout, request ID)
//! - Serve until the shutdown signal

use axum::http::{HeaderName, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::admin::setup_admin_router;
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::http::handlers;
use crate::http::request::X_REQUEST_ID;
use crate::lifecycle::Shutdown;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub admin_api_key: Arc<str>,
}

/// HTTP surface of the engine.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(engine: Arc<Engine>, config: &EngineConfig) -> Self {
        let state = AppState {
            engine,
            admin_api_key: Arc::from(config.admin.api_key.as_str()),
        };
        Self {
            router: build_router(state, Duration::from_secs(config.server.request_timeout_secs)),
        }
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

/// Build the Axum router with all middleware layers.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let request_id = HeaderName::from_static(X_REQUEST_ID);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/access/{content_item_id}", get(handlers::evaluate_access))
        .route("/subscriptions", post(handlers::subscribe))
        .route("/subscriptions/{id}", get(handlers::get_subscription))
        .route("/subscriptions/{id}/cancel", post(handlers::cancel_subscription))
        .route(
            "/entitlements/{subscriber_id}/{creator_id}",
            get(handlers::get_entitlement),
        )
        .route("/sales", get(handlers::list_sales))
        .route("/sales/{id}/preview", get(handlers::preview_redemption))
        .route("/sales/{id}/redeem", post(handlers::redeem))
        .route("/purchases", post(handlers::purchase))
        .route("/settlements", post(handlers::check_payment))
        .route("/price", get(handlers::get_price))
        .merge(setup_admin_router(state.clone()))
        .with_state(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::UnavailableLedger;
    use crate::clock::ManualClock;
    use crate::pricing::{PriceSample, PricingError, RateSource};
    use axum::body::Body;
    use axum::http::Request;
    use futures_util::future::BoxFuture;
    use futures_util::FutureExt;
    use tower::ServiceExt;

    struct NoRates;

    impl RateSource for NoRates {
        fn fetch_rate(&self) -> BoxFuture<'_, Result<PriceSample, PricingError>> {
            async { Err(PricingError::NoProviders) }.boxed()
        }
    }

    fn app() -> (Arc<Engine>, Router) {
        let mut config = EngineConfig::default();
        config.admin.api_key = "secret".to_string();
        let (engine, _monitor) = Engine::build(
            &config,
            Arc::new(ManualClock::new(1_700_000_000)),
            Arc::new(UnavailableLedger),
            Arc::new(NoRates),
        )
        .unwrap();
        let engine = Arc::new(engine);
        let router = HttpServer::new(engine.clone(), &config).router();
        (engine, router)
    }

    fn router() -> Router {
        app().1
    }

    fn post_json(uri: &str, viewer: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::post(uri).header("content-type", "application/json");
        if let Some(viewer) = viewer {
            builder = builder.header("x-viewer-id", viewer);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_carries_request_id() {
        let response = router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(X_REQUEST_ID));
    }

    #[tokio::test]
    async fn test_admin_requires_bearer_key() {
        let anonymous = router()
            .oneshot(Request::get("/admin/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let authorized = router()
            .oneshot(
                Request::get("/admin/status")
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(authorized.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_content_is_denied() {
        let response = router()
            .oneshot(
                Request::get("/access/missing")
                    .header("x-viewer-id", "fan")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let decision = json_body(response).await;
        assert_eq!(decision["allowed"], false);
        assert_eq!(decision["reason"], "ContentNotFound");
    }

    #[tokio::test]
    async fn test_acting_routes_require_a_viewer() {
        let (_engine, router) = app();
        let requests = [
            post_json(
                "/subscriptions",
                None,
                serde_json::json!({"creator_id": "creator", "tier": "basic"}),
            ),
            post_json("/purchases", None, serde_json::json!({"content_item_id": "video"})),
            post_json(
                &format!("/sales/{}/redeem", uuid::Uuid::new_v4()),
                None,
                serde_json::json!({}),
            ),
            post_json(
                "/settlements",
                None,
                serde_json::json!({
                    "proof_ref": "0x01",
                    "payer": "0x1111111111111111111111111111111111111111",
                    "target": {"kind": "purchase", "purchase_id": uuid::Uuid::new_v4()},
                }),
            ),
        ];
        for request in requests {
            let uri = request.uri().to_string();
            let response = router.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_subscribe_acts_for_the_viewer() {
        let (engine, router) = app();
        let response = router
            .oneshot(post_json(
                "/subscriptions",
                Some("fan"),
                serde_json::json!({"subscriber_id": "victim", "creator_id": "creator", "tier": "free"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(json_body(response).await["subscriber_id"], "fan");
        assert!(engine.subscriptions.find("victim", "creator").is_none());
    }

    #[tokio::test]
    async fn test_cancel_is_limited_to_the_subscriber() {
        let (engine, router) = app();
        let subscription = engine
            .subscribe("fan", "creator", crate::tiers::Tier::Free)
            .unwrap();
        let cancel = |id: uuid::Uuid, viewer: &str| {
            post_json(&format!("/subscriptions/{}/cancel", id), Some(viewer), serde_json::json!({}))
        };

        let other = router
            .clone()
            .oneshot(cancel(subscription.id, "intruder"))
            .await
            .unwrap();
        assert_eq!(other.status(), StatusCode::FORBIDDEN);
        assert!(engine.subscriptions.is_entitled("fan", "creator"));

        let missing = router
            .clone()
            .oneshot(cancel(uuid::Uuid::new_v4(), "fan"))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let own = router.oneshot(cancel(subscription.id, "fan")).await.unwrap();
        assert_eq!(own.status(), StatusCode::OK);
        assert!(!engine.subscriptions.is_entitled("fan", "creator"));
    }

    #[tokio::test]
    async fn test_payment_check_is_limited_to_the_owner() {
        let (engine, router) = app();
        let subscription = engine
            .subscribe("fan", "creator", crate::tiers::Tier::Basic)
            .unwrap();
        let response = router
            .oneshot(post_json(
                "/settlements",
                Some("intruder"),
                serde_json::json!({
                    "proof_ref": "0x01",
                    "payer": "0x1111111111111111111111111111111111111111",
                    "target": {"kind": "subscription", "subscription_id": subscription.id},
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
