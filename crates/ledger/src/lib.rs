//! Blockchain side of Ethernity
//!
//! Contract logs are pulled from a JSON-RPC endpoint by the [`EventListener`],
//! decoded against the known contract events and appended to the
//! [`EventStore`]. Background jobs then consume unprocessed events.

use thiserror::Error;

use ethernity_core::{StorageError, UtilError};

pub mod events;
pub mod listener;
pub mod rpc;

pub use events::{BlockchainEvent, BlockchainEventCreate, EventFilter, EventStore, SyncState, SyncStatus};
pub use listener::{event_topic, ContractKind, ContractRegistry, EventListener, EventSignature, PollOutcome};
pub use rpc::{parse_hex_quantity, ChainSource, RpcClient, RpcLog};

/// Ledger error types
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Invalid event data
    #[error("{0}")]
    InvalidInput(String),

    /// Event does not exist
    #[error("Event not found")]
    EventNotFound,

    /// The node answered with an error or an unexpected payload
    #[error("RPC error: {0}")]
    Rpc(String),

    /// The node could not be reached
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Error with storage
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

impl From<UtilError> for LedgerError {
    fn from(err: UtilError) -> Self {
        match err {
            UtilError::InvalidValue(msg) | UtilError::ParseError(msg) => LedgerError::InvalidInput(msg),
        }
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
