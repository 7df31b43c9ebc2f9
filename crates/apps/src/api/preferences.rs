use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use ethernity_economic::{StrategyRecommendation, UserPreference, UserPreferenceCreate, UserPreferenceUpdate};

use crate::api::error::{ApiError, ApiResult};
use crate::api::extract::WalletQuery;
use crate::state::AppState;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/preferences", post(create))
        .route("/preferences/", post(create))
        .route("/preferences/:wallet", get(get_one).patch(update))
        .route("/preferences/:wallet/recommendation", get(recommendation))
}

fn not_found() -> ApiError {
    ApiError::not_found("Preferences not found")
}

async fn create(
    State(state): State<AppState>,
    Query(query): Query<WalletQuery>,
    Json(data): Json<UserPreferenceCreate>,
) -> ApiResult<(StatusCode, Json<UserPreference>)> {
    let preference = state.preferences.create(&query.wallet_address, data).await?;
    Ok((StatusCode::CREATED, Json(preference)))
}

async fn get_one(State(state): State<AppState>, Path(wallet): Path<String>) -> ApiResult<Json<UserPreference>> {
    state.preferences.get(&wallet).await?.map(Json).ok_or_else(not_found)
}

async fn update(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
    Json(update): Json<UserPreferenceUpdate>,
) -> ApiResult<Json<UserPreference>> {
    state.preferences.update(&wallet, update).await?.map(Json).ok_or_else(not_found)
}

async fn recommendation(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
) -> ApiResult<Json<StrategyRecommendation>> {
    state
        .preferences
        .recommendation(&wallet)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Cannot generate recommendation"))
}
