use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::extract::PageQuery;
use crate::notifications::{Notification, NotificationCreate};
use crate::state::AppState;

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/notifications", post(create))
        .route("/notifications/", post(create))
        .route("/notifications/user/:wallet", get(for_wallet))
        .route("/notifications/user/:wallet/unread-count", get(unread_count))
        .route("/notifications/user/:wallet/mark-all-read", post(mark_all_read))
        .route("/notifications/:id/read", post(mark_read))
        .route("/notifications/:id", delete(remove))
}

fn not_found() -> ApiError {
    ApiError::not_found("Notification not found")
}

#[derive(Debug, Default, Deserialize)]
struct UnreadQuery {
    #[serde(default)]
    unread_only: bool,
}

#[derive(Debug, Deserialize)]
struct MarkRead {
    #[serde(default = "default_read")]
    read: bool,
}

fn default_read() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct UnreadCount {
    unread_count: usize,
}

#[derive(Debug, Serialize)]
struct MarkedRead {
    marked_read: usize,
}

async fn create(
    State(state): State<AppState>,
    Json(data): Json<NotificationCreate>,
) -> ApiResult<(StatusCode, Json<Notification>)> {
    let notification = state.notifications.create(data).await?;
    Ok((StatusCode::CREATED, Json(notification)))
}

async fn for_wallet(
    State(state): State<AppState>,
    Path(wallet): Path<String>,
    Query(page): Query<PageQuery>,
    Query(query): Query<UnreadQuery>,
) -> ApiResult<Json<Vec<Notification>>> {
    let notifications = state
        .notifications
        .for_wallet(&wallet, page.pagination(&state), query.unread_only)
        .await?;
    Ok(Json(notifications))
}

async fn unread_count(State(state): State<AppState>, Path(wallet): Path<String>) -> ApiResult<Json<UnreadCount>> {
    Ok(Json(UnreadCount {
        unread_count: state.notifications.unread_count(&wallet).await?,
    }))
}

async fn mark_all_read(State(state): State<AppState>, Path(wallet): Path<String>) -> ApiResult<Json<MarkedRead>> {
    Ok(Json(MarkedRead {
        marked_read: state.notifications.mark_all_read(&wallet).await?,
    }))
}

async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(body): Json<MarkRead>,
) -> ApiResult<Json<Notification>> {
    state
        .notifications
        .mark_read(id, body.read)
        .await?
        .map(Json)
        .ok_or_else(not_found)
}

async fn remove(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<StatusCode> {
    if !state.notifications.delete(id).await? {
        return Err(not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}
