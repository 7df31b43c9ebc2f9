//! Identity management for Ethernity
//!
//! Users are identified by their wallet address. This crate stores user
//! profiles, checks the admin credentials and issues wallet session tokens.

use thiserror::Error;

use ethernity_core::{StorageError, UtilError};

pub mod auth;
pub mod users;

pub use auth::{AdminAuth, AdminLogin, Claims, JwtManager, TokenPair, TokenType};
pub use users::{EmailAssociation, User, UserCreate, UserManager, UserStats, UserUpdate};

/// Error types for identity operations
#[derive(Error, Debug)]
pub enum IdentityError {
    /// No user matches the lookup
    #[error("User not found")]
    UserNotFound,

    /// Wallet already has a user
    #[error("Wallet {0} is already registered")]
    WalletAlreadyRegistered(String),

    /// Email already has a user
    #[error("Email {0} is already registered")]
    EmailAlreadyRegistered(String),

    /// Email belongs to a different wallet
    #[error("Email {0} is already associated with another wallet")]
    EmailInUse(String),

    /// Invalid input data
    #[error("{0}")]
    InvalidInput(String),

    /// Admin login rejected
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Session token past its expiry
    #[error("Token has expired")]
    TokenExpired,

    /// Session token that fails to decode or verify
    #[error("Could not validate credentials")]
    InvalidToken,

    /// Access token used as refresh token or vice versa
    #[error("Invalid token type")]
    InvalidTokenType,

    /// Token could not be signed
    #[error("Token encoding error: {0}")]
    TokenEncoding(String),

    /// Storage error
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

impl From<UtilError> for IdentityError {
    fn from(err: UtilError) -> Self {
        match err {
            UtilError::InvalidValue(msg) | UtilError::ParseError(msg) => IdentityError::InvalidInput(msg),
        }
    }
}

/// Result type for identity operations
pub type IdentityResult<T> = Result<T, IdentityError>;
