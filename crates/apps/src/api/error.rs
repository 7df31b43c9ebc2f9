//! API errors
//!
//! Every domain error maps to an HTTP status and a JSON body of the form
//! `{"error": "...", "path": "..."}` where `path` is only set by the
//! fallback handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use ethernity_core::{StorageError, UtilError};
use ethernity_economic::EconomicError;
use ethernity_governance::GovernanceError;
use ethernity_identity::IdentityError;
use ethernity_ledger::LedgerError;

use crate::AppError;

/// Result type of request handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// An error answered to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub path: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<&'a str>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            path: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Attach the request path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: &self.message,
            path: self.path.as_deref(),
        };
        (self.status, Json(body)).into_response()
    }
}

fn storage_failure(err: impl std::fmt::Display) -> ApiError {
    error!("Storage failure: {}", err);
    ApiError::internal("Internal server error")
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        storage_failure(err)
    }
}

impl From<UtilError> for ApiError {
    fn from(err: UtilError) -> Self {
        match err {
            UtilError::InvalidValue(msg) | UtilError::ParseError(msg) => ApiError::bad_request(msg),
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        let status = match &err {
            IdentityError::UserNotFound => StatusCode::NOT_FOUND,
            IdentityError::WalletAlreadyRegistered(_)
            | IdentityError::EmailAlreadyRegistered(_)
            | IdentityError::EmailInUse(_) => StatusCode::CONFLICT,
            IdentityError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            IdentityError::InvalidCredentials
            | IdentityError::TokenExpired
            | IdentityError::InvalidToken
            | IdentityError::InvalidTokenType => StatusCode::UNAUTHORIZED,
            IdentityError::TokenEncoding(_) | IdentityError::StorageError(_) => return storage_failure(&err),
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<EconomicError> for ApiError {
    fn from(err: EconomicError) -> Self {
        let status = match err {
            EconomicError::Identity(inner) => return inner.into(),
            EconomicError::StorageError(inner) => return inner.into(),
            EconomicError::UserNotFound | EconomicError::NotFound(_) => StatusCode::NOT_FOUND,
            EconomicError::AlreadyExists(_) => StatusCode::CONFLICT,
            EconomicError::InvalidInput(_) | EconomicError::InvalidState(_) => StatusCode::BAD_REQUEST,
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<GovernanceError> for ApiError {
    fn from(err: GovernanceError) -> Self {
        let status = match err {
            GovernanceError::Economic(inner) => return inner.into(),
            GovernanceError::Identity(inner) => return inner.into(),
            GovernanceError::StorageError(inner) => return inner.into(),
            GovernanceError::ProposalNotFound | GovernanceError::UserNotFound => StatusCode::NOT_FOUND,
            GovernanceError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            GovernanceError::InvalidInput(_)
            | GovernanceError::InvalidState(_)
            | GovernanceError::AlreadyVoted(_) => StatusCode::BAD_REQUEST,
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        let status = match err {
            LedgerError::StorageError(inner) => return inner.into(),
            LedgerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            LedgerError::EventNotFound => StatusCode::NOT_FOUND,
            LedgerError::Rpc(_) | LedgerError::Http(_) => StatusCode::BAD_GATEWAY,
        };
        ApiError::new(status, err.to_string())
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(msg) => ApiError::not_found(msg),
            AppError::InvalidInput(msg) => ApiError::bad_request(msg),
            AppError::Unauthorized(msg) => ApiError::unauthorized(msg),
            AppError::Mail(msg) => {
                error!("Mail failure: {}", msg);
                ApiError::internal("Could not send mail")
            }
            AppError::Identity(inner) => inner.into(),
            AppError::Economic(inner) => inner.into(),
            AppError::Governance(inner) => inner.into(),
            AppError::Ledger(inner) => inner.into(),
            AppError::StorageError(inner) => inner.into(),
        }
    }
}
