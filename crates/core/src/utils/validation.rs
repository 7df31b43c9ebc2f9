//! Validation utilities
//!
//! Field-level checks shared by the request types of every domain crate.

use super::UtilError;

/// Validate a string is not empty after trimming
pub fn validate_non_empty(s: &str, field_name: &str) -> Result<(), UtilError> {
    if s.trim().is_empty() {
        return Err(UtilError::InvalidValue(format!("{} cannot be empty", field_name)));
    }
    Ok(())
}

/// Validate a string length (in characters) is between min and max (inclusive)
pub fn validate_string_length(s: &str, min: usize, max: usize, field_name: &str) -> Result<(), UtilError> {
    let len = s.chars().count();
    if len < min || len > max {
        return Err(UtilError::InvalidValue(
            format!("{} must be between {} and {} characters, got {}", field_name, min, max, len)
        ));
    }
    Ok(())
}

/// Validate a string has at least `min` characters
pub fn validate_min_length(s: &str, min: usize, field_name: &str) -> Result<(), UtilError> {
    if s.chars().count() < min {
        return Err(UtilError::InvalidValue(
            format!("{} must be at least {} characters", field_name, min)
        ));
    }
    Ok(())
}

/// Validate a numeric value is between min and max (inclusive)
pub fn validate_range<T: PartialOrd + std::fmt::Display>(
    value: T,
    min: T,
    max: T,
    field_name: &str,
) -> Result<(), UtilError> {
    if value < min || value > max {
        return Err(UtilError::InvalidValue(
            format!("{} must be between {} and {}, got {}", field_name, min, max, value)
        ));
    }
    Ok(())
}

/// Validate an optional wallet address field
pub fn validate_optional_wallet(value: Option<&str>, field_name: &str) -> Result<(), UtilError> {
    match value {
        Some(address) if !super::is_wallet_address(address) => Err(UtilError::InvalidValue(
            format!("{} must be a 0x-prefixed 40 hex character address", field_name)
        )),
        _ => Ok(()),
    }
}
