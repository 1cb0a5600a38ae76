// ABOUTME: Environment variable parsing utilities
// ABOUTME: Helpers for required, optional, defaulted and boolean variables

use std::str::FromStr;

/// Read a variable, treating an empty value the same as an unset one
pub fn optional_env(var_name: &str) -> Option<String> {
    std::env::var(var_name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a string variable with a fallback default value
pub fn env_or_default(var_name: &str, default: &str) -> String {
    optional_env(var_name).unwrap_or_else(|| default.to_string())
}

/// Parse an environment variable with a fallback default value
/// Returns the parsed value or the default if the variable is not set or cannot be parsed
pub fn parse_env_or_default<T>(var_name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match optional_env(var_name) {
        Some(raw_value) => match raw_value.parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!(
                    "Environment variable {} has unparseable value '{}', using default: {}",
                    var_name,
                    raw_value,
                    default
                );
                default
            }
        },
        None => default,
    }
}

/// Parse a boolean flag. Accepts true/false, 1/0, yes/no, on/off (case-insensitive).
pub fn parse_bool_env(var_name: &str, default: bool) -> bool {
    match optional_env(var_name) {
        Some(raw) => match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            _ => {
                tracing::warn!(
                    "Environment variable {} has invalid boolean '{}', using default: {}",
                    var_name,
                    raw,
                    default
                );
                default
            }
        },
        None => default,
    }
}
