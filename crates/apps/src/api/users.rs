use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use ethernity_identity::{EmailAssociation, TokenPair, User, UserCreate, UserUpdate};

use crate::api::error::{ApiError, ApiResult};
use crate::api::extract::{Admin, Client, PageQuery};
use crate::state::AppState;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list))
        .route("/users/", get(list))
        .route("/users/email", post(associate_email))
        .route("/users/register", post(register))
        .route("/users/wallet/:wallet", get(by_wallet))
        .route("/users/login/:wallet", post(login))
        .route("/users/mailing-list", get(mailing_list))
        .route("/users/search", get(search))
        .route("/users/:id", patch(update))
}

fn not_found() -> ApiError {
    ApiError::not_found("User not found")
}

/// A user plus a fresh session
#[derive(Debug, Serialize)]
struct LoginResponse {
    user: User,
    #[serde(flatten)]
    tokens: TokenPair,
}

#[derive(Debug, Deserialize)]
struct MailingQuery {
    #[serde(default = "default_true")]
    accepts_marketing: bool,
    #[serde(default)]
    email_verified: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: String,
}

async fn associate_email(
    State(state): State<AppState>,
    Json(association): Json<EmailAssociation>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let user = state.users.associate_email(association).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn register(
    State(state): State<AppState>,
    Client(client): Client,
    Json(mut data): Json<UserCreate>,
) -> ApiResult<(StatusCode, Json<User>)> {
    data.ip_address = data.ip_address.or(client.ip_address);
    data.user_agent = data.user_agent.or(client.user_agent);
    let user = state.users.register(data).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn by_wallet(State(state): State<AppState>, Path(wallet): Path<String>) -> ApiResult<Json<User>> {
    state.users.get_by_wallet(&wallet).await?.map(Json).ok_or_else(not_found)
}

/// Record a login, registering unknown wallets on the fly
async fn login(State(state): State<AppState>, Path(wallet): Path<String>) -> ApiResult<Json<LoginResponse>> {
    let user = match state.users.update_last_login(&wallet).await? {
        Some(user) => user,
        None => {
            let user = state.users.register(UserCreate::for_wallet(wallet)).await?;
            info!("Registered {} on first login", user.wallet_address);
            user
        }
    };
    let tokens = state.jwt.create_token_pair(&user.wallet_address)?;
    Ok(Json(LoginResponse { user, tokens }))
}

async fn update(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(data): Json<UserUpdate>,
) -> ApiResult<Json<User>> {
    state.users.update(id, data).await?.map(Json).ok_or_else(not_found)
}

async fn list(_: Admin, State(state): State<AppState>, Query(page): Query<PageQuery>) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(state.users.list(page.pagination(&state)).await?))
}

async fn mailing_list(
    _: Admin,
    State(state): State<AppState>,
    Query(query): Query<MailingQuery>,
) -> ApiResult<Json<Vec<User>>> {
    let users = state
        .users
        .mailing_list(query.accepts_marketing, query.email_verified)
        .await?;
    Ok(Json(users))
}

async fn search(
    _: Admin,
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(state.users.search(&query.q, page.pagination(&state)).await?))
}
