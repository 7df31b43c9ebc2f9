use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::analytics::{DailySnapshot, FundPerformance, MetricsOverview, SystemHealthCheck, UserDashboard};
use crate::api::error::{ApiError, ApiResult};
use crate::api::extract::Admin;
use crate::state::AppState;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/analytics/dashboard/:wallet", get(dashboard))
        .route("/analytics/fund/:id/performance", get(fund_performance))
        .route("/analytics/health", get(health))
        .route("/analytics/snapshots", get(snapshots))
        .route("/analytics/snapshots/create", post(create_snapshot))
        .route("/analytics/metrics/overview", get(metrics_overview))
        .route("/analytics/top-funds", get(top_funds))
}

#[derive(Debug, Deserialize)]
struct SnapshotQuery {
    from_date: Option<NaiveDate>,
    to_date: Option<NaiveDate>,
    #[serde(default = "default_snapshot_limit")]
    limit: usize,
}

fn default_snapshot_limit() -> usize {
    30
}

#[derive(Debug, Deserialize)]
struct TopQuery {
    #[serde(default = "default_top_limit")]
    limit: usize,
}

fn default_top_limit() -> usize {
    10
}

async fn dashboard(State(state): State<AppState>, Path(wallet): Path<String>) -> ApiResult<Json<UserDashboard>> {
    state
        .analytics
        .user_dashboard(&wallet)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("User not found"))
}

async fn fund_performance(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Json<FundPerformance>> {
    state
        .analytics
        .fund_performance(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Fund not found"))
}

async fn health(State(state): State<AppState>) -> ApiResult<Json<SystemHealthCheck>> {
    Ok(Json(state.analytics.health().await?))
}

async fn snapshots(
    _: Admin,
    State(state): State<AppState>,
    Query(query): Query<SnapshotQuery>,
) -> ApiResult<Json<Vec<DailySnapshot>>> {
    let (_, max) = state.page_bounds();
    let snapshots = state
        .analytics
        .snapshots(query.from_date, query.to_date, query.limit.min(max))
        .await?;
    Ok(Json(snapshots))
}

async fn create_snapshot(_: Admin, State(state): State<AppState>) -> ApiResult<Json<DailySnapshot>> {
    Ok(Json(state.analytics.create_snapshot().await?))
}

async fn metrics_overview(_: Admin, State(state): State<AppState>) -> ApiResult<Json<MetricsOverview>> {
    Ok(Json(state.analytics.metrics_overview().await?))
}

async fn top_funds(
    _: Admin,
    State(state): State<AppState>,
    Query(query): Query<TopQuery>,
) -> ApiResult<Json<Vec<FundPerformance>>> {
    let (_, max) = state.page_bounds();
    Ok(Json(state.analytics.top_funds(query.limit.min(max)).await?))
}
