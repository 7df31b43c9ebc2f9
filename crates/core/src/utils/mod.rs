//! Utility functions for Ethernity
//!
//! This module provides common utility functions and types used across the
//! Ethernity codebase: timestamps, wallet/email handling, fee math, the token
//! burn/renew calendar and pagination.

use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod validation;

/// Error types for utility operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UtilError {
    /// Parsing error
    #[error("Parsing error: {0}")]
    ParseError(String),

    /// Invalid value
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Result type for utility operations
pub type UtilResult<T> = Result<T, UtilError>;

/// Number of basis points in 100%
pub const BASIS_POINTS: u32 = 10_000;

/// The zero address, used as the sender of mint transfers
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Get the current timestamp in milliseconds
pub fn timestamp_ms() -> u64 {
    let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::from_secs(0));
    (since_epoch.as_secs() * 1000) + (since_epoch.subsec_nanos() as u64 / 1_000_000)
}

/// Get the current timestamp in seconds
pub fn timestamp_secs() -> u64 {
    let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::from_secs(0));
    since_epoch.as_secs()
}

/// Parse a string to a specific type
pub fn parse_string<T: FromStr>(value: &str) -> UtilResult<T>
where
    T::Err: std::fmt::Display,
{
    value.parse::<T>()
        .map_err(|e| UtilError::ParseError(format!("Failed to parse value: {}", e)))
}

fn is_hex_string(value: &str, hex_len: usize) -> bool {
    value.len() == hex_len + 2
        && value.starts_with("0x")
        && value[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// `0x` followed by 40 hex characters
pub fn is_wallet_address(address: &str) -> bool {
    is_hex_string(address, 40)
}

/// `0x` followed by 64 hex characters
pub fn is_transaction_hash(hash: &str) -> bool {
    is_hex_string(hash, 64)
}

/// Validate a wallet address and return its canonical (lowercase) form
pub fn normalize_wallet(address: &str) -> UtilResult<String> {
    let address = address.trim();
    if !is_wallet_address(address) {
        return Err(UtilError::InvalidValue(format!("Invalid wallet address: {}", address)));
    }
    Ok(address.to_lowercase())
}

/// Validate an email address and return its canonical (lowercase) form
pub fn normalize_email(email: &str) -> UtilResult<String> {
    let email = email.trim();
    let mut parts = email.split('@');
    let local = parts.next().unwrap_or_default();
    let domain = parts.next().unwrap_or_default();
    let valid = parts.next().is_none()
        && !local.is_empty()
        && !email.chars().any(char::is_whitespace)
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.');
    if !valid {
        return Err(UtilError::InvalidValue(format!("Invalid email address: {}", email)));
    }
    Ok(email.to_lowercase())
}

/// Shorten an address for display, e.g. `0x1234...abcd`
pub fn format_wallet_address(address: &str) -> String {
    let head = address.get(..6);
    let tail = address.len().checked_sub(4).and_then(|cut| address.get(cut..));
    match (head, tail) {
        (Some(head), Some(tail)) if address.len() >= 10 => format!("{}...{}", head, tail),
        _ => address.to_string(),
    }
}

/// Basis points to a percentage (`300` -> `3.0`)
pub fn basis_points_to_percentage(bp: u32) -> f64 {
    bp as f64 / 100.0
}

/// Round a monetary amount to 6 decimal places
pub fn round_amount(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(6, RoundingStrategy::MidpointNearestEven)
}

/// Fee owed on `amount` at `fee_bps`, rounded to 6 decimals
pub fn calculate_fee(amount: Decimal, fee_bps: u32) -> Decimal {
    round_amount(amount * Decimal::from(fee_bps) / Decimal::from(BASIS_POINTS))
}

/// Split a gross amount into `(fee, net)`
pub fn calculate_net_amount(gross: Decimal, fee_bps: u32) -> (Decimal, Decimal) {
    let fee = calculate_fee(gross, fee_bps);
    (fee, gross - fee)
}

/// Clamp `day` to the last valid day of the month
fn date_in_month(year: i32, month: u32, day: u32) -> NaiveDate {
    let mut day = day.clamp(1, 31);
    loop {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return date;
        }
        day -= 1;
    }
}

/// Whether `date` is the `day` of its month, clamped to the month's last day
pub fn is_day_of_month(date: NaiveDate, day: u32) -> bool {
    date_in_month(date.year(), date.month(), day) == date
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

/// Date of the next burn: `burn_day` of this month, or of next month once it has passed
pub fn next_burn_date(now: DateTime<Utc>, burn_day: u32) -> NaiveDate {
    let today = now.date_naive();
    if today.day() > burn_day {
        let (year, month) = next_month(today.year(), today.month());
        date_in_month(year, month, burn_day)
    } else {
        date_in_month(today.year(), today.month(), burn_day)
    }
}

/// Whole days until the next burn (0 on burn day)
pub fn days_until_burn(now: DateTime<Utc>, burn_day: u32) -> i64 {
    (next_burn_date(now, burn_day) - now.date_naive()).num_days()
}

/// Date of the next renewal: `renew_day` of next month
pub fn next_renew_date(now: DateTime<Utc>, renew_day: u32) -> NaiveDate {
    let today = now.date_naive();
    let (year, month) = next_month(today.year(), today.month());
    date_in_month(year, month, renew_day)
}

/// Whole days until the next renewal
pub fn days_until_renew(now: DateTime<Utc>, renew_day: u32) -> i64 {
    (next_renew_date(now, renew_day) - now.date_naive()).num_days()
}

/// Offset/limit pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Number of items to skip
    pub skip: usize,
    /// Maximum number of items to return
    pub limit: usize,
}

impl Pagination {
    /// Create a pagination window
    pub fn new(skip: usize, limit: usize) -> Self {
        Self { skip, limit }
    }

    /// Build a window from optional query values, clamping the limit
    pub fn clamped(skip: Option<usize>, limit: Option<usize>, default_limit: usize, max_limit: usize) -> Self {
        let limit = limit.unwrap_or(default_limit).min(max_limit);
        Self { skip: skip.unwrap_or(0), limit }
    }

    /// Everything
    pub fn all() -> Self {
        Self { skip: 0, limit: usize::MAX }
    }

    /// Apply the window to an already ordered list
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().skip(self.skip).take(self.limit).collect()
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self { skip: 0, limit: 100 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dec(value: &str) -> Decimal {
        value.parse().unwrap()
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 15, 30, 0).unwrap()
    }

    #[test]
    fn test_wallet_normalization() {
        let wallet = "0xAbCdEf0123456789abcdef0123456789ABCDEF01";
        assert_eq!(normalize_wallet(wallet).unwrap(), wallet.to_lowercase());
        assert!(normalize_wallet("0x123").is_err());
        assert!(normalize_wallet("1xAbCdEf0123456789abcdef0123456789ABCDEF01").is_err());
        assert!(normalize_wallet("0xZZCdEf0123456789abcdef0123456789ABCDEF01").is_err());
    }

    #[test]
    fn test_email_normalization() {
        assert_eq!(normalize_email(" Ana@Example.COM ").unwrap(), "ana@example.com");
        assert!(normalize_email("ana.example.com").is_err());
        assert!(normalize_email("ana@example").is_err());
        assert!(normalize_email("@example.com").is_err());
        assert!(normalize_email("a@b@example.com").is_err());
    }

    #[test]
    fn test_format_wallet_address() {
        assert_eq!(
            format_wallet_address("0xabcdef0123456789abcdef0123456789abcdef01"),
            "0xabcd...ef01"
        );
        assert_eq!(format_wallet_address("0x1234"), "0x1234");
        // Multi-byte characters at either cut come back unchanged
        assert_eq!(format_wallet_address("0x123é4567890ab"), "0x123é4567890ab");
        assert_eq!(format_wallet_address("0x1234567890€€"), "0x1234567890€€");
        assert_eq!(format_wallet_address("0xabcdéééé6789"), "0xabcd...6789");
    }

    #[test]
    fn test_fee_split() {
        let (fee, net) = calculate_net_amount(dec("1100"), 300);
        assert_eq!(fee, dec("33"));
        assert_eq!(net, dec("1067"));
        assert_eq!(calculate_fee(dec("0.1234567"), 300), dec("0.003704"));
        assert_eq!(basis_points_to_percentage(525), 5.25);
    }

    #[test]
    fn test_burn_calendar() {
        assert_eq!(days_until_burn(at(2026, 3, 21), 28), 7);
        assert_eq!(days_until_burn(at(2026, 3, 28), 28), 0);
        // Past burn day rolls into next month
        assert_eq!(next_burn_date(at(2026, 3, 29), 28), NaiveDate::from_ymd_opt(2026, 4, 28).unwrap());
        assert_eq!(next_burn_date(at(2026, 12, 30), 28), NaiveDate::from_ymd_opt(2027, 1, 28).unwrap());
        // Short months clamp
        assert_eq!(next_burn_date(at(2026, 2, 1), 30), NaiveDate::from_ymd_opt(2026, 2, 28).unwrap());
    }

    #[test]
    fn test_is_day_of_month_clamps_short_months() {
        let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        assert!(is_day_of_month(date(2026, 3, 28), 28));
        assert!(!is_day_of_month(date(2026, 3, 27), 28));
        assert!(is_day_of_month(date(2026, 2, 28), 31));
        assert!(is_day_of_month(date(2028, 2, 29), 30));
        assert!(!is_day_of_month(date(2028, 2, 28), 30));
        assert!(is_day_of_month(date(2026, 4, 30), 31));
        assert!(is_day_of_month(date(2026, 5, 1), 0));
        // Agrees with the burn calendar on burn day
        assert_eq!(days_until_burn(at(2026, 2, 28), 31), 0);
    }

    #[test]
    fn test_renew_calendar() {
        assert_eq!(next_renew_date(at(2026, 3, 1), 1), NaiveDate::from_ymd_opt(2026, 4, 1).unwrap());
        assert_eq!(next_renew_date(at(2026, 12, 15), 1), NaiveDate::from_ymd_opt(2027, 1, 1).unwrap());
        assert_eq!(days_until_renew(at(2026, 4, 30), 1), 1);
    }

    #[test]
    fn test_pagination() {
        let items: Vec<u32> = (0..10).collect();
        assert_eq!(Pagination::new(2, 3).apply(items.clone()), vec![2, 3, 4]);
        assert_eq!(Pagination::clamped(None, Some(500), 50, 100).limit, 100);
        assert_eq!(Pagination::clamped(Some(4), None, 50, 100), Pagination::new(4, 50));
        assert_eq!(Pagination::all().apply(items).len(), 10);
    }
}
