//! Public route handlers.
//!
//! Thin adapters: parse the request, call one engine operation, render the
//! result. Business rules live in the components, never here. Routes that
//! act for a user take that user from the [`Viewer`].

use alloy::primitives::U256;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::{AccessDecision, ContentDirectory as _};
use crate::error::EngineError;
use crate::engine::SaleApplication;
use crate::flash_sales::{RedemptionPreview, SaleListing, SaleLookup, SaleScope};
use crate::http::error::ApiResult;
use crate::http::request::Viewer;
use crate::http::server::AppState;
use crate::payments::{PaymentState, SettlementRequest};
use crate::pricing::PriceStatus;
use crate::purchases::Purchase;
use crate::subscriptions::Subscription;
use crate::tiers::Tier;

pub async fn health() -> &'static str {
    "ok"
}

pub async fn evaluate_access(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(content_item_id): Path<String>,
) -> Json<AccessDecision> {
    Json(state.engine.evaluator.evaluate_access(viewer.id(), &content_item_id))
}

#[derive(Debug, Deserialize)]
pub struct SubscribeBody {
    pub creator_id: String,
    /// Tier name, case-insensitive.
    pub tier: String,
}

pub async fn subscribe(
    State(state): State<AppState>,
    viewer: Viewer,
    Json(body): Json<SubscribeBody>,
) -> ApiResult<(StatusCode, Json<Subscription>)> {
    let subscriber_id = viewer.require()?;
    let tier: Tier = body.tier.parse()?;
    let subscription = state
        .engine
        .subscribe(subscriber_id, &body.creator_id, tier)?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Subscription>> {
    let subscription = state
        .engine
        .subscriptions
        .get(id)
        .ok_or_else(|| EngineError::not_found("subscription", id))?;
    Ok(Json(subscription))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Subscription>> {
    let user_id = viewer.require()?;
    Ok(Json(state.engine.cancel_subscription(user_id, id)?))
}

#[derive(Debug, Serialize)]
pub struct EntitlementView {
    pub entitled: bool,
    pub tier: Option<Tier>,
}

pub async fn get_entitlement(
    State(state): State<AppState>,
    Path((subscriber_id, creator_id)): Path<(String, String)>,
) -> Json<EntitlementView> {
    let tier = state
        .engine
        .subscriptions
        .entitlement(&subscriber_id, &creator_id);
    Json(EntitlementView {
        entitled: tier.is_some(),
        tier,
    })
}

#[derive(Debug, Deserialize)]
pub struct SaleQuery {
    pub creator_id: Option<String>,
    pub content_item_id: Option<String>,
}

pub async fn list_sales(
    State(state): State<AppState>,
    Query(query): Query<SaleQuery>,
) -> ApiResult<Json<Vec<SaleListing>>> {
    let lookup = match (&query.content_item_id, &query.creator_id) {
        (Some(item), _) => SaleLookup::ContentItem(item),
        (None, Some(creator)) => SaleLookup::Creator(creator),
        (None, None) => {
            return Err(EngineError::validation("creator_id or content_item_id is required").into())
        }
    };
    Ok(Json(state.engine.sales.list_effective_sales_for(lookup)))
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub user_id: String,
    /// Base price in base units; defaults to the price of what the sale covers.
    pub base_price: Option<String>,
}

pub async fn preview_redemption(
    State(state): State<AppState>,
    Path(sale_id): Path<Uuid>,
    Query(query): Query<PreviewQuery>,
) -> ApiResult<Json<RedemptionPreview>> {
    let engine = &state.engine;
    let base_price = match query.base_price {
        Some(raw) => raw
            .parse::<U256>()
            .map_err(|e| EngineError::validation(format!("invalid base price '{}': {}", raw, e)))?,
        None => {
            let sale = engine
                .sales
                .get_sale(sale_id)
                .ok_or_else(|| EngineError::not_found("flash sale", sale_id))?;
            match sale.scope {
                SaleScope::Subscription { tier: Some(tier) } => engine.catalog.default_price(tier),
                SaleScope::Subscription { tier: None } => {
                    return Err(EngineError::validation(
                        "base_price is required for sales covering every tier",
                    )
                    .into())
                }
                SaleScope::ContentItem { content_item_id } => engine
                    .content
                    .content_item(&content_item_id)?
                    .and_then(|item| item.purchase_price())
                    .ok_or_else(|| EngineError::not_found("content item", &content_item_id))?,
            }
        }
    };

    Ok(Json(
        engine
            .sales
            .preview_redemption(sale_id, &query.user_id, base_price)?,
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct RedeemBody {
    /// Tier to subscribe at; required for sales covering every tier.
    #[serde(default)]
    pub tier: Option<String>,
}

/// Claim a sale slot and open the subscription or purchase it discounts.
pub async fn redeem(
    State(state): State<AppState>,
    viewer: Viewer,
    Path(sale_id): Path<Uuid>,
    Json(body): Json<RedeemBody>,
) -> ApiResult<(StatusCode, Json<SaleApplication>)> {
    let user_id = viewer.require()?;
    let tier = body.tier.as_deref().map(str::parse::<Tier>).transpose()?;
    let applied = state.engine.apply_sale(sale_id, user_id, tier)?;
    Ok((StatusCode::CREATED, Json(applied)))
}

#[derive(Debug, Deserialize)]
pub struct PurchaseBody {
    pub content_item_id: String,
}

pub async fn purchase(
    State(state): State<AppState>,
    viewer: Viewer,
    Json(body): Json<PurchaseBody>,
) -> ApiResult<(StatusCode, Json<Purchase>)> {
    let buyer_id = viewer.require()?;
    let purchase = state.engine.purchase(buyer_id, &body.content_item_id)?;
    Ok((StatusCode::CREATED, Json(purchase)))
}

/// "Check my payment". Answers immediately; verification runs in the
/// background and the client polls the record. Only the record's owner may
/// submit a proof.
pub async fn check_payment(
    State(state): State<AppState>,
    viewer: Viewer,
    Json(request): Json<SettlementRequest>,
) -> ApiResult<(StatusCode, Json<PaymentState>)> {
    let user_id = viewer.require()?;
    let current = state.engine.check_payment(user_id, request)?;
    Ok((StatusCode::ACCEPTED, Json(current)))
}

#[derive(Debug, Serialize)]
pub struct PriceView {
    pub rate: f64,
    pub status: PriceStatus,
}

pub async fn get_price(State(state): State<AppState>) -> Json<PriceView> {
    let rate = state.engine.prices.get_rate().await;
    Json(PriceView {
        rate,
        status: state.engine.prices.get_status(),
    })
}
