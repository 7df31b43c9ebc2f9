//! Applications for Ethernity DAO
//!
//! This crate hosts everything that sits on top of the domain managers:
//! notifications, analytics snapshots, the contact and survey forms, the
//! mailer, background jobs and the HTTP API.

use thiserror::Error;

use ethernity_core::{StorageError, UtilError};
use ethernity_economic::EconomicError;
use ethernity_governance::GovernanceError;
use ethernity_identity::IdentityError;
use ethernity_ledger::LedgerError;

pub mod analytics;
pub mod api;
pub mod contact;
pub mod jobs;
pub mod mailer;
pub mod notifications;
pub mod state;
pub mod survey;

pub use analytics::{AnalyticsService, DailySnapshot, FundPerformance, SystemHealthCheck, UserDashboard};
pub use contact::{ContactManager, ContactMessage, ContactMessageCreate, ContactReply, ContactStats};
pub use jobs::{Scheduler, SchedulerHandle};
pub use mailer::{LogMailer, Mailer, OutgoingMail};
pub use notifications::{Notification, NotificationCreate, NotificationManager, NotificationType};
pub use state::AppState;
pub use survey::{Survey, SurveyCreate, SurveyFollowUp, SurveyFollowUpCreate, SurveyManager, SurveyStats};

/// Where a form submission came from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Requested entity does not exist
    #[error("{0}")]
    NotFound(String),

    /// Invalid input data
    #[error("{0}")]
    InvalidInput(String),

    /// Missing or wrong credentials
    #[error("{0}")]
    Unauthorized(String),

    /// Mail could not be delivered
    #[error("Mail error: {0}")]
    Mail(String),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Economic(#[from] EconomicError),

    #[error(transparent)]
    Governance(#[from] GovernanceError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Storage error
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

impl From<UtilError> for AppError {
    fn from(err: UtilError) -> Self {
        match err {
            UtilError::InvalidValue(msg) | UtilError::ParseError(msg) => AppError::InvalidInput(msg),
        }
    }
}

/// Result type for application operations
pub type AppResult<T> = Result<T, AppError>;
