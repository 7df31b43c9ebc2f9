use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use ethernity_economic::{
    AutoWithdrawalConfig, AutoWithdrawalInfo, DepositKind, FundBalances, FundStats, FundStatus, FundTransaction,
    PersonalFund, PersonalFundCreate, RetirementCheck, TokenActivityType,
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::extract::{Admin, PageQuery, WalletQuery};
use crate::api::tokens::track_activity;
use crate::state::AppState;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/funds", get(list))
        .route("/funds/", get(list))
        .route("/funds/create", post(create))
        .route("/funds/pending-retirement", get(pending_retirement))
        .route("/funds/in-retirement", get(in_retirement))
        .route("/funds/wallet/:wallet", get(by_wallet))
        .route("/funds/address/:address", get(by_address))
        .route("/funds/:id/complete", post(complete))
        .route("/funds/:id/balances", get(balances))
        .route("/funds/:id/stats", get(stats))
        .route("/funds/:id/transactions", get(transactions))
        .route("/funds/:id/deposit", post(deposit))
        .route("/funds/:id/withdraw", post(withdraw))
        .route("/funds/:id/start-retirement", post(start_retirement))
        .route("/funds/:id/can-retire", get(can_retire))
        .route("/funds/:id/auto-withdrawal/configure", post(configure_auto_withdrawal))
        .route("/funds/:id/auto-withdrawal", get(auto_withdrawal))
}

fn not_found() -> ApiError {
    ApiError::not_found("Fund not found")
}

#[derive(Debug, Deserialize)]
struct CompleteRequest {
    fund_address: String,
    transaction_hash: String,
}

#[derive(Debug, Deserialize)]
struct DepositRequest {
    transaction_hash: String,
    #[serde(default)]
    amount: Option<Decimal>,
    #[serde(default)]
    deposit_type: DepositKind,
}

#[derive(Debug, Deserialize)]
struct WithdrawRequest {
    transaction_hash: String,
    #[serde(default)]
    amount: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct TransactionRequest {
    transaction_hash: String,
}

#[derive(Debug, Default, Deserialize)]
struct StatusQuery {
    retirement_status: Option<String>,
}

/// Acknowledgement of an on-chain fund transaction
#[derive(Debug, Serialize)]
struct Recorded {
    success: bool,
    transaction_hash: String,
    transaction: Option<FundTransaction>,
}

async fn create(
    State(state): State<AppState>,
    Query(query): Query<WalletQuery>,
    Json(data): Json<PersonalFundCreate>,
) -> ApiResult<(StatusCode, Json<PersonalFund>)> {
    let fund = state.funds.create(&query.wallet_address, data).await?;
    Ok((StatusCode::CREATED, Json(fund)))
}

async fn complete(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<CompleteRequest>,
) -> ApiResult<Json<PersonalFund>> {
    let fund = state
        .funds
        .complete_creation(id, &request.fund_address, &request.transaction_hash)
        .await?;
    Ok(Json(fund))
}

async fn by_wallet(State(state): State<AppState>, Path(wallet): Path<String>) -> ApiResult<Json<PersonalFund>> {
    state
        .funds
        .get_by_wallet(&wallet)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Fund not found for this wallet"))
}

async fn by_address(State(state): State<AppState>, Path(address): Path<String>) -> ApiResult<Json<PersonalFund>> {
    state.funds.get_by_address(&address).await?.map(Json).ok_or_else(not_found)
}

async fn balances(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Json<FundBalances>> {
    state.funds.balances(id).await?.map(Json).ok_or_else(not_found)
}

async fn stats(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Json<FundStats>> {
    state.funds.stats(id).await?.map(Json).ok_or_else(not_found)
}

async fn transactions(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Json<Vec<FundTransaction>>> {
    if state.funds.get(id).await?.is_none() {
        return Err(not_found());
    }
    Ok(Json(state.funds.transactions(id).await?))
}

async fn deposit(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<DepositRequest>,
) -> ApiResult<Json<Recorded>> {
    let transaction = state
        .funds
        .record_deposit(id, &request.transaction_hash, request.amount, request.deposit_type)
        .await?;
    if let Some(fund) = state.funds.get(id).await? {
        track_activity(
            &state,
            &fund.owner_address,
            TokenActivityType::FundDeposit,
            "Deposit to personal fund",
            Some(&request.transaction_hash),
        )
        .await;
    }
    Ok(Json(Recorded {
        success: true,
        transaction_hash: request.transaction_hash,
        transaction,
    }))
}

async fn withdraw(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<WithdrawRequest>,
) -> ApiResult<Json<Recorded>> {
    let transaction = state
        .funds
        .record_withdrawal(id, &request.transaction_hash, request.amount)
        .await?;
    if let Some(fund) = state.funds.get(id).await? {
        track_activity(
            &state,
            &fund.owner_address,
            TokenActivityType::FundWithdrawal,
            "Withdrawal from personal fund",
            Some(&request.transaction_hash),
        )
        .await;
    }
    Ok(Json(Recorded {
        success: true,
        transaction_hash: request.transaction_hash,
        transaction,
    }))
}

async fn start_retirement(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<TransactionRequest>,
) -> ApiResult<Json<PersonalFund>> {
    Ok(Json(state.funds.start_retirement(id, &request.transaction_hash).await?))
}

async fn can_retire(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Json<RetirementCheck>> {
    state.funds.can_retire(id).await?.map(Json).ok_or_else(not_found)
}

async fn configure_auto_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(config): Json<AutoWithdrawalConfig>,
) -> ApiResult<Json<AutoWithdrawalInfo>> {
    if !state.settings.features.auto_withdrawal {
        return Err(ApiError::bad_request("Auto-withdrawal is disabled"));
    }
    Ok(Json(state.funds.configure_auto_withdrawal(id, config).await?))
}

async fn auto_withdrawal(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Json<AutoWithdrawalInfo>> {
    state.funds.auto_withdrawal_info(id).await?.map(Json).ok_or_else(not_found)
}

async fn list(
    _: Admin,
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<Vec<PersonalFund>>> {
    let status = query
        .retirement_status
        .as_deref()
        .map(str::parse::<FundStatus>)
        .transpose()?;
    Ok(Json(state.funds.list(page.pagination(&state), status).await?))
}

async fn pending_retirement(_: Admin, State(state): State<AppState>) -> ApiResult<Json<Vec<PersonalFund>>> {
    Ok(Json(state.funds.ready_for_retirement().await?))
}

async fn in_retirement(_: Admin, State(state): State<AppState>) -> ApiResult<Json<Vec<PersonalFund>>> {
    Ok(Json(state.funds.in_retirement().await?))
}
