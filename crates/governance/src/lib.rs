//! Governance module for Ethernity
//!
//! GERAS holders create proposals and vote on them with their token balance.
//! A proposal passes when it has more votes for than against and the votes
//! cast reach the quorum share of active holders; it can be executed once the
//! execution timelock after the voting period has expired.

use thiserror::Error;

use ethernity_core::{StorageError, UtilError};
use ethernity_economic::EconomicError;
use ethernity_identity::IdentityError;

pub mod manager;
pub mod proposals;
pub mod voting;

pub use manager::{GovernanceManager, ProposalStats};
pub use proposals::{Proposal, ProposalCreate, ProposalStatus, ProposalType};
pub use voting::{Vote, VoteEligibility, VoterStats, VoterStatsReport};

/// Error types for governance operations
#[derive(Error, Debug)]
pub enum GovernanceError {
    /// Proposal does not exist
    #[error("Proposal not found")]
    ProposalNotFound,

    /// Wallet has no registered user
    #[error("User not found")]
    UserNotFound,

    /// Invalid proposal or query data
    #[error("{0}")]
    InvalidInput(String),

    /// Operation not allowed at this point of the proposal's life
    #[error("{0}")]
    InvalidState(String),

    /// Caller lacks the right to do this
    #[error("{0}")]
    PermissionDenied(String),

    /// Vote already cast
    #[error("{0}")]
    AlreadyVoted(String),

    /// Error from the token side
    #[error(transparent)]
    Economic(#[from] EconomicError),

    /// Error with the identity system
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Error with storage
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

impl From<UtilError> for GovernanceError {
    fn from(err: UtilError) -> Self {
        match err {
            UtilError::InvalidValue(msg) | UtilError::ParseError(msg) => GovernanceError::InvalidInput(msg),
        }
    }
}

/// Result type for governance operations
pub type GovernanceResult<T> = Result<T, GovernanceError>;
