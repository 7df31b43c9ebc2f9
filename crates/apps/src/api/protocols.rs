use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use ethernity_economic::{
    ApyHistory, ApyUpdate, DeFiProtocol, DeFiProtocolCreate, DeFiProtocolUpdate, ProtocolStats, ProtocolWithApy,
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::extract::{Admin, PageQuery};
use crate::state::AppState;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/protocols", get(list).post(add))
        .route("/protocols/", get(list).post(add))
        .route("/protocols/best-apy", get(best_apy))
        .route("/protocols/stats", get(stats))
        .route("/protocols/by-risk/:level", get(by_risk))
        .route("/protocols/address/:address", get(by_address))
        .route("/protocols/:id", get(get_one).patch(update))
        .route("/protocols/:id/verify", post(verify))
        .route("/protocols/:id/toggle-status", post(toggle_status))
        .route("/protocols/:id/update-apy", post(update_apy))
        .route("/protocols/:id/apy-history", get(apy_history))
}

fn not_found() -> ApiError {
    ApiError::not_found("Protocol not found")
}

#[derive(Debug, Default, Deserialize)]
struct ProtocolFilter {
    #[serde(default)]
    active_only: bool,
    #[serde(default)]
    verified_only: bool,
    risk_level: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct BestApyQuery {
    risk_level: Option<u8>,
    #[serde(default = "default_best_limit")]
    limit: usize,
}

fn default_best_limit() -> usize {
    10
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    50
}

#[derive(Debug, Deserialize)]
struct ApyRequest {
    new_apy: u32,
}

async fn list(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<ProtocolFilter>,
) -> ApiResult<Json<Vec<DeFiProtocol>>> {
    let protocols = state
        .protocols
        .list(page.pagination(&state), filter.active_only, filter.verified_only, filter.risk_level)
        .await?;
    Ok(Json(protocols))
}

async fn get_one(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Json<DeFiProtocol>> {
    state.protocols.get(id).await?.map(Json).ok_or_else(not_found)
}

async fn by_address(State(state): State<AppState>, Path(address): Path<String>) -> ApiResult<Json<DeFiProtocol>> {
    state.protocols.get_by_address(&address).await?.map(Json).ok_or_else(not_found)
}

async fn best_apy(State(state): State<AppState>, Query(query): Query<BestApyQuery>) -> ApiResult<Json<Vec<ProtocolWithApy>>> {
    let (_, max) = state.page_bounds();
    let limit = query.limit.min(max);
    Ok(Json(state.protocols.best_apy(query.risk_level, limit).await?))
}

async fn by_risk(State(state): State<AppState>, Path(level): Path<u8>) -> ApiResult<Json<Vec<DeFiProtocol>>> {
    if !(1..=3).contains(&level) {
        return Err(ApiError::bad_request("Risk level must be 1 (LOW), 2 (MEDIUM), or 3 (HIGH)"));
    }
    Ok(Json(state.protocols.by_risk_level(level).await?))
}

async fn stats(State(state): State<AppState>) -> ApiResult<Json<ProtocolStats>> {
    Ok(Json(state.protocols.stats().await?))
}

async fn apy_history(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<ApyHistory>>> {
    Ok(Json(state.protocols.apy_history(id, query.limit).await?))
}

async fn add(
    _: Admin,
    State(state): State<AppState>,
    Json(data): Json<DeFiProtocolCreate>,
) -> ApiResult<(StatusCode, Json<DeFiProtocol>)> {
    let protocol = state.protocols.add(data).await?;
    Ok((StatusCode::CREATED, Json(protocol)))
}

async fn update(
    _: Admin,
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(update): Json<DeFiProtocolUpdate>,
) -> ApiResult<Json<DeFiProtocol>> {
    state.protocols.update(id, update).await?.map(Json).ok_or_else(not_found)
}

async fn verify(_: Admin, State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Json<DeFiProtocol>> {
    state.protocols.verify(id).await?.map(Json).ok_or_else(not_found)
}

async fn toggle_status(_: Admin, State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Json<DeFiProtocol>> {
    state.protocols.toggle_status(id).await?.map(Json).ok_or_else(not_found)
}

async fn update_apy(
    _: Admin,
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<ApyRequest>,
) -> ApiResult<Json<ApyUpdate>> {
    Ok(Json(state.protocols.update_apy(id, request.new_apy).await?))
}
