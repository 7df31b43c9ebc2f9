use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;

use crate::api::error::{ApiError, ApiResult};
use crate::api::extract::{Admin, Client, PageQuery};
use crate::api::message;
use crate::contact::{ContactMessage, ContactMessageCreate, ContactReply, ContactStats};
use crate::state::AppState;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/contact", post(create))
        .route("/contact/", post(create))
        .route("/contact/messages", get(list))
        .route("/contact/messages/:id", get(get_one).delete(remove))
        .route("/contact/messages/:id/read", patch(mark_read))
        .route("/contact/messages/:id/reply", post(reply))
        .route("/contact/stats", get(stats))
}

fn not_found() -> ApiError {
    ApiError::not_found("Contact message not found")
}

#[derive(Debug, Default, Deserialize)]
struct InboxQuery {
    #[serde(default)]
    unread_only: bool,
}

#[derive(Debug, Deserialize)]
struct ReadUpdate {
    is_read: bool,
}

#[derive(Debug, Deserialize)]
struct ReplyRequest {
    reply_content: String,
    #[serde(default = "default_admin_name")]
    admin_name: String,
}

fn default_admin_name() -> String {
    "Ethernity DAO Team".to_string()
}

async fn create(
    State(state): State<AppState>,
    Client(client): Client,
    Json(data): Json<ContactMessageCreate>,
) -> ApiResult<(StatusCode, Json<ContactMessage>)> {
    let contact = state.contacts.create(data, client).await?;
    Ok((StatusCode::CREATED, Json(contact)))
}

async fn list(
    _: Admin,
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
    Query(filter): Query<InboxQuery>,
) -> ApiResult<Json<Vec<ContactMessage>>> {
    let messages = state.contacts.list(page.pagination(&state), filter.unread_only).await?;
    Ok(Json(messages))
}

async fn get_one(_: Admin, State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Json<ContactMessage>> {
    state.contacts.get(id).await?.map(Json).ok_or_else(not_found)
}

async fn mark_read(
    _: Admin,
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(update): Json<ReadUpdate>,
) -> ApiResult<Json<ContactMessage>> {
    state
        .contacts
        .mark_read(id, update.is_read)
        .await?
        .map(Json)
        .ok_or_else(not_found)
}

async fn remove(_: Admin, State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<Json<Value>> {
    if !state.contacts.delete(id).await? {
        return Err(not_found());
    }
    Ok(message("Contact message deleted"))
}

async fn reply(
    _: Admin,
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<ReplyRequest>,
) -> ApiResult<Json<ContactReply>> {
    let reply = state
        .contacts
        .reply(id, &request.reply_content, &request.admin_name)
        .await?;
    Ok(Json(reply))
}

async fn stats(_: Admin, State(state): State<AppState>) -> ApiResult<Json<ContactStats>> {
    Ok(Json(state.contacts.stats().await?))
}
