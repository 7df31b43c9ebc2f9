//! Core Ethernity module
//!
//! This module provides the fundamental components shared by every Ethernity
//! crate: persistence, configuration, time and common utilities.

pub mod storage;
pub mod config;
pub mod time;
pub mod utils;

// Re-export key components
pub use storage::{
    Collection, JsonStorage, MemoryStorage, Record, SledStorage, Storage, StorageError,
    StorageResult,
};
pub use config::{ConfigError, ConfigResult, Settings};
pub use time::{Clock, ManualClock, SystemClock};
pub use utils::{Pagination, UtilError, UtilResult};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Package description
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Initialize tracing for Ethernity
///
/// `RUST_LOG` takes precedence; otherwise `default_level` is used as the filter.
pub fn init_tracing(default_level: &str) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    // Set the subscriber as the global default
    tracing::subscriber::set_global_default(subscriber)
}
