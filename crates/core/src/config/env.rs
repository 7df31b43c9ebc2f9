//! Environment variable overrides for Ethernity settings
//!
//! Every variable uses the `ETHERNITY_` prefix, e.g. `ETHERNITY_SERVER_PORT`.
//! Values that fail to parse are reported and the current value is kept.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use super::{Settings, StorageBackend};

/// Environment variable prefix for Ethernity configuration
pub const ENV_PREFIX: &str = "ETHERNITY_";

fn env_key(key: &str) -> String {
    format!("{}{}", ENV_PREFIX, key)
}

/// Parse an environment variable with the Ethernity prefix
fn parse_env<T: FromStr>(key: &str, current: T) -> T
where
    T::Err: std::fmt::Display,
{
    let env_key = env_key(key);
    match env::var(&env_key) {
        Ok(value) => match value.trim().parse::<T>() {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Failed to parse env variable {}: {}", env_key, e);
                current
            }
        },
        Err(_) => current,
    }
}

/// Parse a boolean environment variable
fn parse_bool_env(key: &str, current: bool) -> bool {
    let env_key = env_key(key);
    match env::var(&env_key) {
        Ok(value) => match value.to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => true,
            "false" | "0" | "no" | "n" | "off" => false,
            _ => {
                warn!("Failed to parse boolean env variable {}", env_key);
                current
            }
        },
        Err(_) => current,
    }
}

/// Parse a comma-separated list environment variable
fn parse_list_env(key: &str, current: Vec<String>) -> Vec<String> {
    match env::var(env_key(key)) {
        Ok(value) => value
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => current,
    }
}

fn parse_string_env(key: &str, current: String) -> String {
    env::var(env_key(key)).unwrap_or(current)
}

fn parse_optional_env(key: &str, current: Option<String>) -> Option<String> {
    match env::var(env_key(key)) {
        Ok(value) if value.trim().is_empty() => None,
        Ok(value) => Some(value.trim().to_string()),
        Err(_) => current,
    }
}

/// Apply `ETHERNITY_*` overrides on top of `settings`
pub fn apply_env_overrides(settings: &mut Settings) {
    settings.environment = parse_string_env("ENVIRONMENT", settings.environment.clone());
    settings.debug = parse_bool_env("DEBUG", settings.debug);
    settings.log_level = parse_string_env("LOG_LEVEL", settings.log_level.clone());

    let server = &mut settings.server;
    server.host = parse_string_env("SERVER_HOST", server.host.clone());
    server.port = parse_env("SERVER_PORT", server.port);
    server.cors_origins = parse_list_env("CORS_ORIGINS", server.cors_origins.clone());
    server.frontend_url = parse_string_env("FRONTEND_URL", server.frontend_url.clone());

    let security = &mut settings.security;
    security.secret_key = parse_string_env("SECRET_KEY", security.secret_key.clone());
    security.access_token_expire_minutes =
        parse_env("ACCESS_TOKEN_EXPIRE_MINUTES", security.access_token_expire_minutes);
    security.refresh_token_expire_minutes =
        parse_env("REFRESH_TOKEN_EXPIRE_MINUTES", security.refresh_token_expire_minutes);
    security.admin_email = parse_string_env("ADMIN_EMAIL", security.admin_email.clone());
    security.admin_password = parse_string_env("ADMIN_PASSWORD", security.admin_password.clone());
    security.admin_token = parse_string_env("ADMIN_TOKEN", security.admin_token.clone());

    settings.rate_limit.enabled = parse_bool_env("RATE_LIMIT_ENABLED", settings.rate_limit.enabled);
    settings.rate_limit.per_minute = parse_env("RATE_LIMIT_PER_MINUTE", settings.rate_limit.per_minute);

    let storage = &mut settings.storage;
    if let Ok(backend) = env::var(env_key("STORAGE_BACKEND")) {
        match backend.to_lowercase().as_str() {
            "memory" => storage.backend = StorageBackend::Memory,
            "sled" => storage.backend = StorageBackend::Sled,
            other => warn!("Unknown storage backend {}, keeping {:?}", other, storage.backend),
        }
    }
    if let Ok(dir) = env::var(env_key("DATA_DIR")) {
        storage.data_dir = PathBuf::from(dir);
    }
    storage.sync_writes = parse_bool_env("SYNC_WRITES", storage.sync_writes);

    let chain = &mut settings.blockchain;
    chain.rpc_url = parse_string_env("RPC_URL", chain.rpc_url.clone());
    chain.network = parse_string_env("NETWORK", chain.network.clone());
    chain.chain_id = parse_env("CHAIN_ID", chain.chain_id);
    chain.sync_interval_secs = parse_env("SYNC_INTERVAL", chain.sync_interval_secs);
    chain.event_processing_interval_secs =
        parse_env("EVENT_PROCESSING_INTERVAL", chain.event_processing_interval_secs);
    chain.batch_size = parse_env("BATCH_SIZE", chain.batch_size);
    chain.token_address = parse_optional_env("TOKEN_ADDRESS", chain.token_address.take());
    chain.factory_address = parse_optional_env("FACTORY_ADDRESS", chain.factory_address.take());
    chain.governance_address = parse_optional_env("GOVERNANCE_ADDRESS", chain.governance_address.take());
    chain.treasury_address = parse_optional_env("TREASURY_ADDRESS", chain.treasury_address.take());

    settings.token.burn_day = parse_env("BURN_DAY", settings.token.burn_day);
    settings.token.renew_day = parse_env("RENEW_DAY", settings.token.renew_day);
    settings.token.burn_warning_days = parse_env("BURN_WARNING_DAYS", settings.token.burn_warning_days);

    let fund = &mut settings.fund;
    fund.fee_bps = parse_env("FEE_BPS", fund.fee_bps);
    fund.min_monthly_deposit = parse_env("MIN_MONTHLY_DEPOSIT", fund.min_monthly_deposit);
    fund.min_timelock_years = parse_env("MIN_TIMELOCK_YEARS", fund.min_timelock_years);
    fund.max_timelock_years = parse_env("MAX_TIMELOCK_YEARS", fund.max_timelock_years);
    fund.default_timelock_years = parse_env("DEFAULT_TIMELOCK_YEARS", fund.default_timelock_years);

    let gov = &mut settings.governance;
    gov.quorum_bps = parse_env("QUORUM_BPS", gov.quorum_bps);
    gov.voting_delay_secs = parse_env("VOTING_DELAY", gov.voting_delay_secs);
    gov.voting_period_secs = parse_env("VOTING_PERIOD", gov.voting_period_secs);
    gov.execution_delay_secs = parse_env("EXECUTION_DELAY", gov.execution_delay_secs);

    settings.pagination.default_page_size =
        parse_env("DEFAULT_PAGE_SIZE", settings.pagination.default_page_size);
    settings.pagination.max_page_size = parse_env("MAX_PAGE_SIZE", settings.pagination.max_page_size);

    let features = &mut settings.features;
    features.governance = parse_bool_env("ENABLE_GOVERNANCE", features.governance);
    features.auto_withdrawal = parse_bool_env("ENABLE_AUTO_WITHDRAWAL", features.auto_withdrawal);
    features.early_retirement = parse_bool_env("ENABLE_EARLY_RETIREMENT", features.early_retirement);
    features.notifications = parse_bool_env("ENABLE_NOTIFICATIONS", features.notifications);
    features.blockchain_sync = parse_bool_env("ENABLE_BLOCKCHAIN_SYNC", features.blockchain_sync);

    settings.mail.enabled = parse_bool_env("MAIL_ENABLED", settings.mail.enabled);
    settings.mail.from_address = parse_string_env("MAIL_FROM", settings.mail.from_address.clone());
    settings.mail.admin_address = parse_optional_env("ADMIN_NOTIFICATION_EMAIL", settings.mail.admin_address.take());
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test so that concurrent tests never race on the process environment
    #[test]
    fn test_env_overrides() {
        env::set_var("ETHERNITY_SERVER_PORT", "9001");
        env::set_var("ETHERNITY_RATE_LIMIT_ENABLED", "off");
        env::set_var("ETHERNITY_CORS_ORIGINS", "https://a.example, https://b.example");
        env::set_var("ETHERNITY_STORAGE_BACKEND", "memory");
        env::set_var("ETHERNITY_FEE_BPS", "not-a-number");
        env::set_var("ETHERNITY_TOKEN_ADDRESS", "0x00000000000000000000000000000000000000aa");

        let mut settings = Settings::default();
        apply_env_overrides(&mut settings);

        assert_eq!(settings.server.port, 9001);
        assert!(!settings.rate_limit.enabled);
        assert_eq!(settings.server.cors_origins, vec!["https://a.example", "https://b.example"]);
        assert_eq!(settings.storage.backend, StorageBackend::Memory);
        assert_eq!(settings.fund.fee_bps, 300);
        assert_eq!(
            settings.blockchain.token_address.as_deref(),
            Some("0x00000000000000000000000000000000000000aa")
        );

        for key in [
            "SERVER_PORT",
            "RATE_LIMIT_ENABLED",
            "CORS_ORIGINS",
            "STORAGE_BACKEND",
            "FEE_BPS",
            "TOKEN_ADDRESS",
        ] {
            env::remove_var(env_key(key));
        }
    }
}
