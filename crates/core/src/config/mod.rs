//! Configuration for Ethernity
//!
//! [`Settings`] is loaded from an optional YAML file and then overridden by
//! `ETHERNITY_*` environment variables (see [`env`]).

use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub mod env;

/// Error types for configuration operations
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Parsing error
    #[error("Parsing error: {0}")]
    ParseError(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Secret key shipped in the defaults; must be replaced outside development
pub const DEFAULT_SECRET_KEY: &str = "change-me-in-production";

fn default_project_name() -> String {
    "Ethernity DAO".to_string()
}

fn default_api_prefix() -> String {
    "/api/v1".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Allowed CORS origins
    pub cors_origins: Vec<String>,
    /// Public frontend URL, always allowed by CORS
    pub frontend_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
            frontend_url: "http://localhost:3000".to_string(),
        }
    }
}

impl ServerConfig {
    /// `host:port`
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Configured origins plus the frontend URL, deduplicated
    pub fn allowed_origins(&self) -> Vec<String> {
        let mut origins = self.cors_origins.clone();
        if !self.frontend_url.is_empty() && !origins.contains(&self.frontend_url) {
            origins.push(self.frontend_url.clone());
        }
        origins
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// HMAC secret for JWT signing
    pub secret_key: String,
    /// Access token lifetime in minutes
    pub access_token_expire_minutes: i64,
    /// Refresh token lifetime in minutes
    pub refresh_token_expire_minutes: i64,
    /// Admin login email
    pub admin_email: String,
    /// Admin login password
    pub admin_password: String,
    /// Static bearer token for admin routes
    pub admin_token: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            secret_key: DEFAULT_SECRET_KEY.to_string(),
            access_token_expire_minutes: 10_080,
            refresh_token_expire_minutes: 43_200,
            admin_email: "admin@ethernity.dao".to_string(),
            admin_password: "admin".to_string(),
            admin_token: String::new(),
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled
    pub enabled: bool,
    /// Requests allowed per client per minute
    pub per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_minute: 60,
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Volatile in-memory storage
    Memory,
    /// Embedded sled database
    Sled,
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::Sled
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend to use
    pub backend: StorageBackend,
    /// Directory for the sled database
    pub data_dir: PathBuf,
    /// Whether to flush after every write
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: PathBuf::from("data"),
            sync_writes: true,
        }
    }
}

/// Blockchain connectivity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockchainConfig {
    /// JSON-RPC endpoint
    pub rpc_url: String,
    /// Network name
    pub network: String,
    /// Chain id
    pub chain_id: u64,
    /// Seconds between sync rounds
    pub sync_interval_secs: u64,
    /// Seconds between event processing rounds
    pub event_processing_interval_secs: u64,
    /// Maximum blocks per sync round
    pub batch_size: u64,
    /// GERAS token contract
    pub token_address: Option<String>,
    /// Personal fund factory contract
    pub factory_address: Option<String>,
    /// Governance contract
    pub governance_address: Option<String>,
    /// Treasury contract
    pub treasury_address: Option<String>,
}

impl Default for BlockchainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://sepolia-rollup.arbitrum.io/rpc".to_string(),
            network: "arbitrum-sepolia".to_string(),
            chain_id: 421_614,
            sync_interval_secs: 30,
            event_processing_interval_secs: 60,
            batch_size: 100,
            token_address: None,
            factory_address: None,
            governance_address: None,
            treasury_address: None,
        }
    }
}

/// GERAS token calendar
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Day of month on which inactive tokens are burned
    pub burn_day: u32,
    /// Day of month on which burned tokens may be renewed
    pub renew_day: u32,
    /// Days before the burn on which warnings are sent
    pub burn_warning_days: i64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            burn_day: 28,
            renew_day: 1,
            burn_warning_days: 7,
        }
    }
}

/// Personal fund rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FundConfig {
    /// Deposit fee in basis points
    pub fee_bps: u32,
    /// Minimum monthly deposit
    pub min_monthly_deposit: Decimal,
    /// Minimum timelock in years
    pub min_timelock_years: u32,
    /// Maximum timelock in years
    pub max_timelock_years: u32,
    /// Timelock used when none is requested
    pub default_timelock_years: u32,
    /// Minimum auto-withdrawal interval in days
    pub min_auto_withdrawal_interval_days: u32,
}

impl Default for FundConfig {
    fn default() -> Self {
        Self {
            fee_bps: 300,
            min_monthly_deposit: Decimal::from(100),
            min_timelock_years: 10,
            max_timelock_years: 50,
            default_timelock_years: 15,
            min_auto_withdrawal_interval_days: 7,
        }
    }
}

/// Governance timing and quorum
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Quorum in basis points of active holders
    pub quorum_bps: u32,
    /// Delay between creation and voting start, in seconds
    pub voting_delay_secs: i64,
    /// Voting period in seconds
    pub voting_period_secs: i64,
    /// Delay between voting end and execution, in seconds
    pub execution_delay_secs: i64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            quorum_bps: 2_000,
            voting_delay_secs: 86_400,
            voting_period_secs: 259_200,
            execution_delay_secs: 172_800,
        }
    }
}

/// Pagination limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Page size when none is requested
    pub default_page_size: usize,
    /// Upper bound for any requested page size
    pub max_page_size: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 100,
        }
    }
}

/// Feature flags
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub governance: bool,
    pub auto_withdrawal: bool,
    pub early_retirement: bool,
    pub notifications: bool,
    pub blockchain_sync: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            governance: true,
            auto_withdrawal: true,
            early_retirement: true,
            notifications: true,
            blockchain_sync: false,
        }
    }
}

/// Outgoing mail configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// Whether mail should be sent at all
    pub enabled: bool,
    /// Sender address
    pub from_address: String,
    /// Recipient of admin notifications
    pub admin_address: Option<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            from_address: "no-reply@ethernity.dao".to_string(),
            admin_address: None,
        }
    }
}

/// Complete backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Project name
    #[serde(default = "default_project_name")]
    pub project_name: String,
    /// Prefix for versioned API routes
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    /// Deployment environment (`development`, `staging`, `production`)
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Verbose errors
    #[serde(default)]
    pub debug: bool,
    /// Default tracing filter
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub blockchain: BlockchainConfig,
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub fund: FundConfig,
    #[serde(default)]
    pub governance: GovernanceConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub mail: MailConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            api_prefix: default_api_prefix(),
            environment: default_environment(),
            debug: false,
            log_level: default_log_level(),
            server: ServerConfig::default(),
            security: SecurityConfig::default(),
            rate_limit: RateLimitConfig::default(),
            storage: StorageConfig::default(),
            blockchain: BlockchainConfig::default(),
            token: TokenConfig::default(),
            fund: FundConfig::default(),
            governance: GovernanceConfig::default(),
            pagination: PaginationConfig::default(),
            features: FeatureFlags::default(),
            mail: MailConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Parse settings from a YAML document
    pub fn from_yaml(contents: &str) -> ConfigResult<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        env::apply_env_overrides(&mut settings);
        settings
    }

    /// Optional file, then environment overrides
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut settings = match path {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(path)?
            }
            None => Self::default(),
        };
        env::apply_env_overrides(&mut settings);
        Ok(settings)
    }

    /// Whether this is a development deployment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Whether this is a production deployment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Check the configuration and return human-readable warnings
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if !self.is_development() && self.security.secret_key == DEFAULT_SECRET_KEY {
            warnings.push("SECRET_KEY uses the default value outside development".to_string());
        }
        if self.security.secret_key.len() < 16 {
            warnings.push("SECRET_KEY is shorter than 16 characters".to_string());
        }
        if self.security.admin_token.is_empty() {
            warnings.push("ADMIN_TOKEN is empty; admin routes are unreachable".to_string());
        }
        if self.fund.fee_bps > 1_000 {
            warnings.push(format!("Fund fee of {} bps exceeds 10%", self.fund.fee_bps));
        }
        if self.fund.min_timelock_years > self.fund.max_timelock_years {
            warnings.push("Minimum timelock is greater than maximum timelock".to_string());
        }
        if self.fund.default_timelock_years < self.fund.min_timelock_years
            || self.fund.default_timelock_years > self.fund.max_timelock_years
        {
            warnings.push("Default timelock is outside the allowed range".to_string());
        }
        if self.governance.quorum_bps > 10_000 {
            warnings.push("Governance quorum exceeds 100%".to_string());
        }
        if self.pagination.default_page_size > self.pagination.max_page_size {
            warnings.push("Default page size exceeds max page size".to_string());
        }
        if !(1..=28).contains(&self.token.burn_day) {
            warnings.push(format!("Burn day {} may not exist in every month", self.token.burn_day));
        }

        for warning in &warnings {
            warn!("Configuration warning: {}", warning);
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.project_name, "Ethernity DAO");
        assert_eq!(settings.api_prefix, "/api/v1");
        assert_eq!(settings.security.access_token_expire_minutes, 10_080);
        assert_eq!(settings.rate_limit.per_minute, 60);
        assert_eq!(settings.token.burn_day, 28);
        assert_eq!(settings.fund.fee_bps, 300);
        assert_eq!(settings.governance.quorum_bps, 2_000);
        assert_eq!(settings.pagination.max_page_size, 100);
        assert!(settings.is_development());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
environment: production
server:
  port: 9100
fund:
  fee_bps: 250
storage:
  backend: memory
"#;
        let settings = Settings::from_yaml(yaml).unwrap();
        assert!(settings.is_production());
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.fund.fee_bps, 250);
        assert_eq!(settings.fund.max_timelock_years, 50);
        assert_eq!(settings.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_validate_flags_insecure_production() {
        let mut settings = Settings::default();
        settings.environment = "production".to_string();
        settings.fund.min_timelock_years = 60;

        let warnings = settings.validate();
        assert!(warnings.iter().any(|w| w.contains("SECRET_KEY uses the default")));
        assert!(warnings.iter().any(|w| w.contains("ADMIN_TOKEN")));
        assert!(warnings.iter().any(|w| w.contains("Minimum timelock")));
    }

    #[test]
    fn test_allowed_origins_include_frontend() {
        let mut server = ServerConfig::default();
        server.frontend_url = "https://app.ethernity.dao".to_string();
        assert!(server.allowed_origins().contains(&"https://app.ethernity.dao".to_string()));
        assert_eq!(server.bind_address(), "0.0.0.0:8000");
    }
}
