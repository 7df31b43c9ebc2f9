use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use ethernity_identity::AdminLogin;

use crate::api::error::ApiResult;
use crate::state::AppState;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/admin/login", post(admin_login))
        .route("/auth/refresh", post(refresh))
}

#[derive(Debug, Deserialize)]
struct AdminCredentials {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Debug, Serialize)]
struct AccessToken {
    access_token: String,
    token_type: &'static str,
}

async fn admin_login(State(state): State<AppState>, Json(credentials): Json<AdminCredentials>) -> ApiResult<Json<AdminLogin>> {
    Ok(Json(state.admin.login(&credentials.email, &credentials.password)?))
}

async fn refresh(State(state): State<AppState>, Json(request): Json<RefreshRequest>) -> ApiResult<Json<AccessToken>> {
    let access_token = state.jwt.refresh_access_token(&request.refresh_token)?;
    Ok(Json(AccessToken {
        access_token,
        token_type: "bearer",
    }))
}
