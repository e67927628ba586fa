//! Validated environment variable access.
//!
//! Values are trimmed and blank values are treated like missing ones, so a
//! variable exported as `HUB_CONNECT_INIT=` falls back to its default.

use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when accessing environment variables.
#[derive(Debug, Error)]
pub enum EnvVarError {
    #[error("Environment variable '{name}' not found")]
    NotFound { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8 characters")]
    InvalidUtf8 { name: String },

    #[error("Environment variable '{name}' is empty")]
    Empty { name: String },

    #[error("Environment variable '{name}' has invalid value '{value}'")]
    Invalid { name: String, value: String },
}

/// Utility functions for environment variable handling.
///
/// # Examples
///
/// ```no_run
/// use connector::utils::EnvUtils;
///
/// let initial: u64 =
///     EnvUtils::parse_with("HUB_CONNECT_INIT", EnvUtils::get_optional_var).unwrap_or(60);
/// ```
pub struct EnvUtils;

impl EnvUtils {
    /// Gets the trimmed value of a variable.
    ///
    /// # Errors
    ///
    /// Returns [`EnvVarError`] if the variable is not set, not valid UTF-8 or blank.
    pub fn get_validated_var(name: &str) -> Result<String, EnvVarError> {
        match std::env::var(name) {
            Ok(value) => {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    Err(EnvVarError::Empty {
                        name: name.to_string(),
                    })
                } else {
                    Ok(trimmed.to_string())
                }
            }
            Err(std::env::VarError::NotPresent) => Err(EnvVarError::NotFound {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(EnvVarError::InvalidUtf8 {
                name: name.to_string(),
            }),
        }
    }

    pub fn get_optional_var(name: &str) -> Option<String> {
        Self::get_validated_var(name).ok()
    }

    /// Gets a variable from `lookup` parsed into `T`, or `None` when it is missing or
    /// does not parse.
    ///
    /// Invalid values are logged at warn level.
    pub fn parse_with<T, L>(name: &str, lookup: L) -> Option<T>
    where
        T: FromStr,
        L: Fn(&str) -> Option<String>,
    {
        let value = lookup(name)?;
        match value.trim().parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                log::warn!(
                    "{}",
                    EnvVarError::Invalid {
                        name: name.to_string(),
                        value,
                    }
                );
                None
            }
        }
    }
}
