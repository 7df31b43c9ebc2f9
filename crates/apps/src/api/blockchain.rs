use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use ethernity_ledger::{BlockchainEvent, BlockchainEventCreate, EventFilter, PollOutcome, SyncStatus};

use crate::api::error::{ApiError, ApiResult};
use crate::api::extract::{Admin, PageQuery};
use crate::jobs::Scheduler;
use crate::state::AppState;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/blockchain/events", get(list).post(record))
        .route("/blockchain/events/unprocessed", get(unprocessed))
        .route("/blockchain/events/tx/:hash", get(by_transaction))
        .route("/blockchain/events/:id", get(get_one))
        .route("/blockchain/events/:id/mark-processed", post(mark_processed))
        .route("/blockchain/sync", post(sync))
        .route("/blockchain/sync/status", get(sync_status))
}

fn not_found() -> ApiError {
    ApiError::not_found("Event not found")
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, Serialize)]
struct SyncResult {
    #[serde(flatten)]
    outcome: PollOutcome,
    processed_events: usize,
}

async fn record(
    State(state): State<AppState>,
    Json(data): Json<BlockchainEventCreate>,
) -> ApiResult<(StatusCode, Json<BlockchainEvent>)> {
    let event = state.events.record(data).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn list(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<EventFilter>,
) -> ApiResult<Json<Vec<BlockchainEvent>>> {
    Ok(Json(state.events.list(page.pagination(&state), &filter).await?))
}

async fn get_one(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Json<BlockchainEvent>> {
    state.events.get(id).await?.map(Json).ok_or_else(not_found)
}

async fn by_transaction(State(state): State<AppState>, Path(hash): Path<String>) -> ApiResult<Json<Vec<BlockchainEvent>>> {
    Ok(Json(state.events.by_transaction(&hash).await?))
}

async fn mark_processed(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Json<BlockchainEvent>> {
    state.events.mark_processed(id).await?.map(Json).ok_or_else(not_found)
}

async fn unprocessed(State(state): State<AppState>, Query(query): Query<LimitQuery>) -> ApiResult<Json<Vec<BlockchainEvent>>> {
    let (_, max) = state.page_bounds();
    Ok(Json(state.events.unprocessed(query.limit.min(max)).await?))
}

async fn sync_status(State(state): State<AppState>) -> ApiResult<Json<SyncStatus>> {
    Ok(Json(state.events.sync_status().await?))
}

/// One listener round followed by event processing
async fn sync(_: Admin, State(state): State<AppState>) -> ApiResult<Json<SyncResult>> {
    let scheduler = Scheduler::new(state);
    let outcome = scheduler.sync_blockchain().await?.unwrap_or_else(|| PollOutcome::Skipped {
        reason: "Blockchain sync is not configured".to_string(),
    });
    let processed_events = scheduler.process_events().await?;
    Ok(Json(SyncResult {
        outcome,
        processed_events,
    }))
}
