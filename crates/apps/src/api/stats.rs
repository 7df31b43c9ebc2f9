use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::analytics::AdminStats;
use crate::api::error::ApiResult;
use crate::api::extract::Admin;
use crate::state::AppState;

pub(crate) fn routes() -> Router<AppState> {
    Router::new().route("/stats/admin/stats", get(admin_stats))
}

async fn admin_stats(_: Admin, State(state): State<AppState>) -> ApiResult<Json<AdminStats>> {
    Ok(Json(state.analytics.admin_stats().await?))
}
