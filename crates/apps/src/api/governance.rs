use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{error, warn};

use ethernity_governance::{
    Proposal, ProposalCreate, ProposalStats, ProposalStatus, ProposalType, Vote, VoteEligibility,
    VoterStatsReport,
};

use crate::api::error::{ApiError, ApiResult};
use crate::api::extract::{Admin, MaybeAdmin, PageQuery, WalletQuery};
use crate::jobs::Scheduler;
use crate::state::AppState;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/governance/proposals", get(list).post(create))
        .route("/governance/proposals/", get(list).post(create))
        .route("/governance/proposals/active", get(active))
        .route("/governance/proposals/pending-execution", get(pending_execution))
        .route("/governance/proposals/:id", get(get_one))
        .route("/governance/proposals/:id/vote", post(vote))
        .route("/governance/proposals/:id/votes", get(votes))
        .route("/governance/proposals/:id/can-vote/:wallet", get(can_vote))
        .route("/governance/proposals/:id/cancel", post(cancel))
        .route("/governance/proposals/:id/execute", post(execute))
        .route("/governance/stats", get(stats))
        .route("/governance/voter/:wallet/stats", get(voter_stats))
}

fn ensure_enabled(state: &AppState) -> ApiResult<()> {
    if state.settings.features.governance {
        Ok(())
    } else {
        Err(ApiError::bad_request("Governance is disabled"))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProposalFilter {
    status: Option<String>,
    proposal_type: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct VoteRequest {
    support: bool,
}

#[derive(Debug, Deserialize)]
struct CancelRequest {
    reason: String,
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    transaction_hash: String,
}

async fn create(
    State(state): State<AppState>,
    Query(query): Query<WalletQuery>,
    Json(data): Json<ProposalCreate>,
) -> ApiResult<(StatusCode, Json<Proposal>)> {
    ensure_enabled(&state)?;
    let proposal = state.governance.create_proposal(&query.wallet_address, data).await?;

    if state.settings.features.notifications {
        if let Err(e) = Scheduler::new(state.clone()).notify_new_proposal(&proposal).await {
            warn!("Failed to notify holders about proposal #{}: {}", proposal.proposal_id, e);
        }
    }
    Ok((StatusCode::CREATED, Json(proposal)))
}

async fn list(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<ProposalFilter>,
) -> ApiResult<Json<Vec<Proposal>>> {
    let status = filter
        .status
        .as_deref()
        .map(str::parse::<ProposalStatus>)
        .transpose()?;
    let proposal_type = filter.proposal_type.map(ProposalType::try_from).transpose()?;
    let proposals = state
        .governance
        .list(page.pagination(&state), status, proposal_type)
        .await?;
    Ok(Json(proposals))
}

async fn active(State(state): State<AppState>) -> ApiResult<Json<Vec<Proposal>>> {
    Ok(Json(state.governance.active().await?))
}

async fn pending_execution(State(state): State<AppState>) -> ApiResult<Json<Vec<Proposal>>> {
    Ok(Json(state.governance.pending_execution().await?))
}

async fn get_one(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Json<Proposal>> {
    state
        .governance
        .get(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Proposal not found"))
}

async fn vote(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<WalletQuery>,
    Json(request): Json<VoteRequest>,
) -> ApiResult<(StatusCode, Json<Vote>)> {
    ensure_enabled(&state)?;
    let vote = state
        .governance
        .cast_vote(id, &query.wallet_address, request.support)
        .await?;
    Ok((StatusCode::CREATED, Json(vote)))
}

async fn votes(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<Vote>>> {
    Ok(Json(state.governance.votes(id, page.pagination(&state)).await?))
}

async fn can_vote(
    State(state): State<AppState>,
    Path((id, wallet)): Path<(u64, String)>,
) -> ApiResult<Json<VoteEligibility>> {
    Ok(Json(state.governance.can_vote(id, &wallet).await?))
}

async fn cancel(
    MaybeAdmin(is_admin): MaybeAdmin,
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<WalletQuery>,
    Json(request): Json<CancelRequest>,
) -> ApiResult<Json<Proposal>> {
    let proposal = state
        .governance
        .cancel(id, &query.wallet_address, &request.reason, is_admin)
        .await?;
    Ok(Json(proposal))
}

/// Execute a passed proposal; treasury proposals with a target also pay out
async fn execute(
    _: Admin,
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<ExecuteRequest>,
) -> ApiResult<Json<Proposal>> {
    let proposal = state.governance.execute(id, &request.transaction_hash).await?;

    if proposal.proposal_type == ProposalType::Treasury && proposal.target_value > Decimal::ZERO {
        if let Some(recipient) = &proposal.target_address {
            if let Err(e) = state
                .treasury
                .withdraw_fees(proposal.proposal_id, recipient, proposal.target_value, &proposal.title)
                .await
            {
                error!("Treasury payout for proposal #{} failed: {}", proposal.proposal_id, e);
            }
        }
    }
    Ok(Json(proposal))
}

async fn stats(State(state): State<AppState>) -> ApiResult<Json<ProposalStats>> {
    Ok(Json(state.governance.stats().await?))
}

async fn voter_stats(State(state): State<AppState>, Path(wallet): Path<String>) -> ApiResult<Json<VoterStatsReport>> {
    Ok(Json(state.governance.voter_stats(&wallet).await?))
}
