use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::access::ContentItem;
use crate::engine::EngineStatus;
use crate::error::EngineError;
use crate::flash_sales::{FlashSale, SaleConfig, SaleListing};
use crate::http::error::ApiResult;
use crate::http::server::AppState;
use crate::payments::{AuditEntry, CreatorPayee, SettlementOutcome, SettlementRequest};

pub async fn get_status(State(state): State<AppState>) -> Json<EngineStatus> {
    Json(state.engine.status())
}

pub async fn upsert_content(
    State(state): State<AppState>,
    Json(item): Json<ContentItem>,
) -> ApiResult<StatusCode> {
    state.engine.content.upsert(item)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_sale(
    State(state): State<AppState>,
    Json(config): Json<SaleConfig>,
) -> ApiResult<(StatusCode, Json<FlashSale>)> {
    let sale = state.engine.sales.create_sale(config)?;
    Ok((StatusCode::CREATED, Json(sale)))
}

#[derive(Serialize)]
pub struct SaleDetail {
    #[serde(flatten)]
    pub listing: SaleListing,
    pub completed_redemptions: usize,
}

pub async fn get_sale(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SaleDetail>> {
    let sales = &state.engine.sales;
    let listing = sales
        .listing(id)
        .ok_or_else(|| EngineError::not_found("flash sale", id))?;
    Ok(Json(SaleDetail {
        listing,
        completed_redemptions: sales.completed_count(id),
    }))
}

pub async fn deactivate_sale(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<FlashSale>> {
    Ok(Json(state.engine.sales.deactivate(id)?))
}

/// Register where a creator's payments must land.
pub async fn upsert_payee(
    State(state): State<AppState>,
    Json(payee): Json<CreatorPayee>,
) -> ApiResult<StatusCode> {
    state.engine.register_payee(payee)?;
    Ok(StatusCode::NO_CONTENT)
}

/// One synchronous verification pass, bypassing the queue.
pub async fn verify_settlement(
    State(state): State<AppState>,
    Json(request): Json<SettlementRequest>,
) -> ApiResult<Json<SettlementOutcome>> {
    Ok(Json(state.engine.reconciler.verify_and_settle(&request).await?))
}

/// Audit trail of a proof, under any spelling of it.
pub async fn get_audit(
    State(state): State<AppState>,
    Path(proof_ref): Path<String>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    let proof_ref = state.engine.reconciler.canonical_proof_ref(&proof_ref)?;
    Ok(Json(state.engine.audit.entries_for(&proof_ref)))
}

#[derive(Serialize)]
pub struct RefreshResult {
    pub rate: f64,
}

pub async fn refresh_price(State(state): State<AppState>) -> Json<RefreshResult> {
    Json(RefreshResult {
        rate: state.engine.prices.refresh().await,
    })
}
