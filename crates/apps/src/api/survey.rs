use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;

use crate::api::error::{ApiError, ApiResult};
use crate::api::extract::{Admin, Client, PageQuery};
use crate::api::message;
use crate::state::AppState;
use crate::survey::{InterestedEmail, Survey, SurveyCreate, SurveyFollowUp, SurveyFollowUpCreate, SurveyStats};

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/survey/surveys", get(list).post(create))
        .route("/survey/surveys/follow-up", post(create_follow_up))
        .route("/survey/surveys/follow-ups", get(follow_ups))
        .route("/survey/surveys/follow-ups/:id", delete(remove_follow_up))
        .route("/survey/surveys/stats", get(stats))
        .route("/survey/surveys/emails", get(emails))
        .route("/survey/surveys/:id", get(get_one).delete(remove))
}

fn not_found() -> ApiError {
    ApiError::not_found("Survey not found")
}

#[derive(Debug, Serialize)]
struct EmailList {
    total: usize,
    emails: Vec<InterestedEmail>,
}

async fn create(
    State(state): State<AppState>,
    Client(client): Client,
    Json(data): Json<SurveyCreate>,
) -> ApiResult<(StatusCode, Json<Survey>)> {
    let survey = state.surveys.create(data, client).await?;
    Ok((StatusCode::CREATED, Json(survey)))
}

async fn create_follow_up(
    State(state): State<AppState>,
    Client(client): Client,
    Json(data): Json<SurveyFollowUpCreate>,
) -> ApiResult<(StatusCode, Json<SurveyFollowUp>)> {
    let follow_up = state.surveys.create_follow_up(data, client).await?;
    Ok((StatusCode::CREATED, Json(follow_up)))
}

async fn list(_: Admin, State(state): State<AppState>, Query(page): Query<PageQuery>) -> ApiResult<Json<Vec<Survey>>> {
    Ok(Json(state.surveys.list(page.pagination(&state)).await?))
}

async fn follow_ups(
    _: Admin,
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<SurveyFollowUp>>> {
    Ok(Json(state.surveys.follow_ups(page.pagination(&state)).await?))
}

async fn stats(_: Admin, State(state): State<AppState>) -> ApiResult<Json<SurveyStats>> {
    Ok(Json(state.surveys.stats().await?))
}

async fn emails(_: Admin, State(state): State<AppState>) -> ApiResult<Json<EmailList>> {
    let emails = state.surveys.interested_emails().await?;
    Ok(Json(EmailList {
        total: emails.len(),
        emails,
    }))
}

async fn get_one(_: Admin, State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Survey>> {
    state.surveys.get(&id).await?.map(Json).ok_or_else(not_found)
}

async fn remove(_: Admin, State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    if !state.surveys.delete(&id).await? {
        return Err(not_found());
    }
    Ok(message("Survey deleted"))
}

async fn remove_follow_up(_: Admin, State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    if !state.surveys.delete_follow_up(&id).await? {
        return Err(ApiError::not_found("Follow-up not found"));
    }
    Ok(message("Follow-up deleted"))
}
