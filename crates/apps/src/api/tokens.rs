use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::warn;

use ethernity_economic::{
    BurnInfo, RenewInfo, TokenActivity, TokenActivityCreate, TokenActivityType, TokenHolder, TokenStats,
};
use ethernity_ledger::PollOutcome;

use crate::api::error::{ApiError, ApiResult};
use crate::api::extract::{Admin, PageQuery, WalletQuery};
use crate::jobs::Scheduler;
use crate::state::AppState;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/tokens/holder/:wallet", get(holder))
        .route("/tokens/holder/:wallet/activities", get(activities))
        .route("/tokens/activity", post(record_activity))
        .route("/tokens/stats", get(stats))
        .route("/tokens/holders", get(holders))
        .route("/tokens/holders/inactive", get(inactive))
        .route("/tokens/burn/upcoming", get(upcoming_burn))
        .route("/tokens/renew/upcoming", get(upcoming_renew))
        .route("/tokens/mint", post(mint))
        .route("/tokens/sync-from-blockchain", post(sync_from_blockchain))
}

/// Record an activity for a holder, logging instead of failing when the
/// wallet holds no token
pub(crate) async fn track_activity(
    state: &AppState,
    wallet: &str,
    kind: TokenActivityType,
    description: &str,
    tx_hash: Option<&str>,
) {
    match state.tokens.active_holder(wallet).await {
        Ok(Some(_)) => {}
        Ok(None) => return,
        Err(e) => {
            warn!("Holder lookup for {} failed: {}", wallet, e);
            return;
        }
    }

    let mut activity = TokenActivityCreate::new(kind, description);
    if let Some(hash) = tx_hash {
        activity = activity.with_transaction(hash);
    }
    if let Err(e) = state.tokens.record_activity(wallet, activity).await {
        warn!("Failed to record {} activity for {}: {}", kind, wallet, e);
    }
}

#[derive(Debug, Default, Deserialize)]
struct HoldersQuery {
    #[serde(default)]
    active_only: bool,
}

#[derive(Debug, Deserialize)]
struct MintRequest {
    wallet_address: String,
}

#[derive(Debug, Serialize)]
struct SyncReport {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<PollOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    processed_events: Option<usize>,
}

async fn holder(State(state): State<AppState>, Path(wallet): Path<String>) -> ApiResult<Json<TokenHolder>> {
    state
        .tokens
        .holder(&wallet)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Token holder not found"))
}

async fn activities(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<TokenActivity>>> {
    Ok(Json(state.tokens.holder_activities(&wallet, page.pagination(&state)).await?))
}

async fn record_activity(
    State(state): State<AppState>,
    Query(query): Query<WalletQuery>,
    Json(activity): Json<TokenActivityCreate>,
) -> ApiResult<(StatusCode, Json<TokenActivity>)> {
    let activity = state.tokens.record_activity(&query.wallet_address, activity).await?;
    Ok((StatusCode::CREATED, Json(activity)))
}

async fn stats(State(state): State<AppState>) -> ApiResult<Json<TokenStats>> {
    Ok(Json(state.tokens.stats().await?))
}

async fn inactive(State(state): State<AppState>) -> ApiResult<Json<Vec<TokenHolder>>> {
    Ok(Json(state.tokens.inactive_holders().await?))
}

async fn upcoming_burn(State(state): State<AppState>) -> ApiResult<Json<BurnInfo>> {
    Ok(Json(state.tokens.burn_info().await?))
}

async fn upcoming_renew(State(state): State<AppState>) -> ApiResult<Json<RenewInfo>> {
    Ok(Json(state.tokens.renew_info().await?))
}

async fn holders(
    _: Admin,
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(query): Query<HoldersQuery>,
) -> ApiResult<Json<Vec<TokenHolder>>> {
    Ok(Json(state.tokens.holders(page.pagination(&state), query.active_only).await?))
}

async fn mint(
    _: Admin,
    State(state): State<AppState>,
    Json(request): Json<MintRequest>,
) -> ApiResult<(StatusCode, Json<TokenHolder>)> {
    let user = state
        .users
        .get_by_wallet(&request.wallet_address)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    let holder = state.tokens.mint(user.id, &user.wallet_address).await?;
    Ok((StatusCode::CREATED, Json(holder)))
}

async fn sync_from_blockchain(_: Admin, State(state): State<AppState>) -> ApiResult<Json<SyncReport>> {
    if state.listener.is_none() {
        return Ok(Json(SyncReport {
            success: true,
            message: "Sync initiated".to_string(),
            outcome: None,
            processed_events: None,
        }));
    }

    let scheduler = Scheduler::new(state);
    let outcome = scheduler.sync_blockchain().await?;
    let processed = scheduler.process_events().await?;
    Ok(Json(SyncReport {
        success: true,
        message: "Sync completed".to_string(),
        outcome,
        processed_events: Some(processed),
    }))
}
