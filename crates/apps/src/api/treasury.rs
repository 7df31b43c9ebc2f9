use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::Deserialize;

use ethernity_economic::{
    EarlyRetirementRequest, FundFeeRecord, TokenActivityType, TreasuryStatsReport, TreasuryWithdrawal,
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::extract::{Admin, PageQuery, WalletQuery};
use crate::api::tokens::track_activity;
use crate::state::AppState;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/treasury/early-retirement", get(list_requests).post(request_early_retirement))
        .route("/treasury/early-retirement/fund/:address", get(request_by_fund))
        .route("/treasury/early-retirement/:id/approve", post(approve))
        .route("/treasury/early-retirement/:id/reject", post(reject))
        .route("/treasury/stats", get(stats))
        .route("/treasury/fees", get(all_fees).post(record_fee))
        .route("/treasury/fees/:fund_address", get(fund_fees))
        .route("/treasury/withdrawals", get(withdrawals))
}

#[derive(Debug, Deserialize)]
struct EarlyRetirementBody {
    fund_address: String,
    reason: String,
}

#[derive(Debug, Default, Deserialize)]
struct PendingQuery {
    #[serde(default)]
    pending_only: bool,
}

#[derive(Debug, Deserialize)]
struct ApproveRequest {
    transaction_hash: String,
}

#[derive(Debug, Deserialize)]
struct RejectRequest {
    reason: String,
}

#[derive(Debug, Deserialize)]
struct FeeRequest {
    fund_address: String,
    amount: Decimal,
    transaction_hash: String,
}

async fn request_early_retirement(
    State(state): State<AppState>,
    Query(query): Query<WalletQuery>,
    Json(body): Json<EarlyRetirementBody>,
) -> ApiResult<(StatusCode, Json<EarlyRetirementRequest>)> {
    if !state.settings.features.early_retirement {
        return Err(ApiError::bad_request("Early retirement is disabled"));
    }
    let request = state
        .treasury
        .create_request(&query.wallet_address, &body.fund_address, &body.reason)
        .await?;
    track_activity(
        &state,
        &request.requester_address,
        TokenActivityType::EarlyRetirementRequested,
        "Early retirement requested",
        None,
    )
    .await;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn request_by_fund(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<Json<EarlyRetirementRequest>> {
    state
        .treasury
        .request_by_fund(&address)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("No early retirement request for this fund"))
}

async fn stats(State(state): State<AppState>) -> ApiResult<Json<TreasuryStatsReport>> {
    Ok(Json(state.treasury.stats().await?))
}

async fn fund_fees(State(state): State<AppState>, Path(address): Path<String>) -> ApiResult<Json<FundFeeRecord>> {
    state
        .treasury
        .fund_fees(&address)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("No fees recorded for this fund"))
}

async fn list_requests(
    _: Admin,
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(query): Query<PendingQuery>,
) -> ApiResult<Json<Vec<EarlyRetirementRequest>>> {
    let requests = state
        .treasury
        .list_requests(page.pagination(&state), query.pending_only)
        .await?;
    Ok(Json(requests))
}

async fn approve(
    _: Admin,
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(body): Json<ApproveRequest>,
) -> ApiResult<Json<EarlyRetirementRequest>> {
    let request = state.treasury.approve(id, &body.transaction_hash).await?;
    track_activity(
        &state,
        &request.requester_address,
        TokenActivityType::EarlyRetirementApproved,
        "Early retirement approved",
        Some(&body.transaction_hash),
    )
    .await;
    Ok(Json(request))
}

async fn reject(
    _: Admin,
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(body): Json<RejectRequest>,
) -> ApiResult<Json<EarlyRetirementRequest>> {
    Ok(Json(state.treasury.reject(id, &body.reason).await?))
}

async fn record_fee(
    _: Admin,
    State(state): State<AppState>,
    Json(body): Json<FeeRequest>,
) -> ApiResult<Json<FundFeeRecord>> {
    let record = state
        .treasury
        .record_fee(&body.fund_address, body.amount, &body.transaction_hash)
        .await?;
    Ok(Json(record))
}

async fn all_fees(
    _: Admin,
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<FundFeeRecord>>> {
    Ok(Json(state.treasury.all_fees(page.pagination(&state)).await?))
}

async fn withdrawals(_: Admin, State(state): State<AppState>) -> ApiResult<Json<Vec<TreasuryWithdrawal>>> {
    Ok(Json(state.treasury.withdrawals().await?))
}
