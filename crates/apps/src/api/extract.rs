//! Request extractors shared by the route modules

use std::net::SocketAddr;

use axum::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::header::{AUTHORIZATION, USER_AGENT};
use axum::http::request::Parts;
use axum::http::{Extensions, HeaderMap};
use serde::Deserialize;

use ethernity_core::Pagination;

use crate::api::error::ApiError;
use crate::state::AppState;
use crate::ClientInfo;

/// Bearer token of the `Authorization` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(token.trim())
    } else {
        None
    }
}

/// Client address: first `X-Forwarded-For` entry, then the peer address
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

/// Requires the admin bearer token
#[derive(Debug, Clone, Copy)]
pub struct Admin;

#[async_trait]
impl FromRequestParts<AppState> for Admin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or_else(|| ApiError::unauthorized("Not authenticated"))?;
        if state.admin.verify_token(token) {
            Ok(Admin)
        } else {
            Err(ApiError::unauthorized("Invalid admin token"))
        }
    }
}

/// Whether the request carries a valid admin bearer token
#[derive(Debug, Clone, Copy)]
pub struct MaybeAdmin(pub bool);

#[async_trait]
impl FromRequestParts<AppState> for MaybeAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let is_admin = bearer_token(&parts.headers)
            .map(|token| state.admin.verify_token(token))
            .unwrap_or(false);
        Ok(MaybeAdmin(is_admin))
    }
}

/// Origin of the request
#[derive(Debug, Clone)]
pub struct Client(pub ClientInfo);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Client {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(Client(ClientInfo {
            ip_address: client_ip(&parts.headers, &parts.extensions),
            user_agent,
        }))
    }
}

/// `skip` and `limit` query parameters
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageQuery {
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

impl PageQuery {
    /// Clamp to the configured page sizes
    pub fn pagination(&self, state: &AppState) -> Pagination {
        let (default_limit, max_limit) = state.page_bounds();
        Pagination::clamped(self.skip, self.limit, default_limit, max_limit)
    }
}

/// `wallet_address` query parameter
#[derive(Debug, Clone, Deserialize)]
pub struct WalletQuery {
    pub wallet_address: String,
}
