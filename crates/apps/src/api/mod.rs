//! HTTP API
//!
//! One module per domain, each exposing `routes()` with absolute paths below
//! the API prefix. [`router`] nests them under the configured prefix and adds
//! CORS, request tracing, security headers and the rate limiter.

use axum::extract::{OriginalUri, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{Method, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::state::AppState;

pub mod error;
pub mod extract;
pub mod rate_limit;

mod analytics;
mod auth;
mod blockchain;
mod contact;
mod funds;
mod governance;
mod notifications;
mod preferences;
mod protocols;
mod stats;
mod survey;
mod tokens;
mod treasury;
mod users;

pub use error::{ApiError, ApiResult};

/// Plain `{"message": ...}` body
pub(crate) fn message(text: impl Into<String>) -> Json<Value> {
    Json(json!({ "message": text.into() }))
}

/// Liveness payload
#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    message: String,
    version: &'static str,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        message: format!("{} backend alive!", state.settings.project_name),
        version: ethernity_core::VERSION,
    })
}

async fn root(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "message": format!("Welcome to {}", state.settings.project_name),
        "version": ethernity_core::VERSION,
        "status": "running",
        "environment": state.settings.environment,
        "api_prefix": state.settings.api_prefix,
    }))
}

async fn not_found(OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::not_found("Not found").with_path(uri.path())
}

/// Adds the standard security headers to every response
async fn security_headers<B>(request: Request<B>, next: Next<B>) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(HeaderName::from_static("x-frame-options"), HeaderValue::from_static("DENY"));
    headers.insert(
        HeaderName::from_static("x-xss-protection"),
        HeaderValue::from_static("1; mode=block"),
    );
    response
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let origins: Vec<HeaderValue> = state
        .settings
        .server
        .allowed_origins()
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
}

/// Every versioned route
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .merge(contact::routes())
        .merge(users::routes())
        .merge(auth::routes())
        .merge(funds::routes())
        .merge(tokens::routes())
        .merge(governance::routes())
        .merge(protocols::routes())
        .merge(treasury::routes())
        .merge(preferences::routes())
        .merge(blockchain::routes())
        .merge(analytics::routes())
        .merge(notifications::routes())
        .merge(survey::routes())
        .merge(stats::routes())
}

/// The complete application router
pub fn router(state: AppState) -> Router {
    let prefix = state.settings.api_prefix.trim_end_matches('/').to_string();
    let cors = cors_layer(&state);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest(&prefix, api_routes())
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit::rate_limit))
        .layer(middleware::from_fn(security_headers))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
