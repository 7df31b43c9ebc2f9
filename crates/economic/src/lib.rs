//! Ethernity Economic System
//!
//! This crate provides the money side of Ethernity: personal retirement funds
//! and their transactions, the GERAS activity token, the DeFi protocol
//! registry, yield routing preferences and the fee treasury.

use ethernity_core::{StorageError, UtilError};
use ethernity_identity::IdentityError;

pub mod funds;
pub mod preferences;
pub mod protocols;
pub mod token;
pub mod treasury;

pub use funds::{
    AutoWithdrawalConfig, AutoWithdrawalInfo, DepositKind, FundBalances, FundManager, FundStats,
    FundStatus, FundTransaction, FundTransactionType, PersonalFund, PersonalFundCreate, RetirementCheck,
};
pub use preferences::{
    PreferenceManager, RoutingStrategy, StrategyRecommendation, UserPreference, UserPreferenceCreate,
    UserPreferenceUpdate,
};
pub use protocols::{
    ApyHistory, ApyUpdate, DeFiProtocol, DeFiProtocolCreate, DeFiProtocolUpdate, ProtocolManager,
    ProtocolStats, ProtocolWithApy,
};
pub use token::{
    BurnInfo, RenewInfo, TokenActivity, TokenActivityCreate, TokenActivityType, TokenHolder, TokenManager,
    TokenMonthlyStats, TokenStats,
};
pub use treasury::{
    EarlyRetirementRequest, FundFeeRecord, TreasuryManager, TreasuryStats, TreasuryStatsReport,
    TreasuryWithdrawal,
};

/// Economic error types
#[derive(Debug, thiserror::Error)]
pub enum EconomicError {
    /// Wallet has no registered user
    #[error("User not found")]
    UserNotFound,

    /// Referenced entity does not exist
    #[error("{0}")]
    NotFound(String),

    /// Entity would be duplicated
    #[error("{0}")]
    AlreadyExists(String),

    /// Invalid input data
    #[error("{0}")]
    InvalidInput(String),

    /// Operation not allowed in the current state
    #[error("{0}")]
    InvalidState(String),

    /// Identity error
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Storage error
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

impl From<UtilError> for EconomicError {
    fn from(err: UtilError) -> Self {
        match err {
            UtilError::InvalidValue(msg) | UtilError::ParseError(msg) => EconomicError::InvalidInput(msg),
        }
    }
}

/// Result type for economic operations
pub type EconomicResult<T> = Result<T, EconomicError>;
