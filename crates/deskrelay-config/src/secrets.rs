// crates/deskrelay-config/src/secrets.rs
// ============================================================================
// Module: Deskrelay Secret References
// Description: Indirect secret references resolved at startup.
// Purpose: Keep credentials and envelope keys out of configuration files.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A [`SecretRef`] names exactly one source, an environment variable or a
//! file, and never holds the secret itself. Resolution trims trailing
//! whitespace, enforces a size limit, and rejects empty values. The resolved
//! [`SecretValue`] redacts itself in debug output.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fmt;
use std::fs;
use std::path::PathBuf;

use deskrelay_core::hashing::secret_fingerprint;
use serde::Deserialize;

use crate::config::ConfigError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum resolved secret size in bytes.
pub const MAX_SECRET_BYTES: usize = 4 * 1024;
/// Maximum environment variable name length.
const MAX_ENV_NAME_LENGTH: usize = 128;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Reference to a secret held outside the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretRef {
    /// Environment variable holding the secret.
    #[serde(default)]
    pub env: Option<String>,
    /// File holding the secret.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl SecretRef {
    /// Builds a reference to an environment variable.
    #[must_use]
    pub fn from_env(name: impl Into<String>) -> Self {
        Self {
            env: Some(name.into()),
            file: None,
        }
    }

    /// Builds a reference to a file.
    #[must_use]
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            env: None,
            file: Some(path.into()),
        }
    }

    /// Validates that exactly one source is named.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when zero or two sources are set or a
    /// source name is malformed.
    pub fn validate(&self, field: &str) -> Result<(), ConfigError> {
        match (&self.env, &self.file) {
            (Some(name), None) => {
                if name.is_empty()
                    || name.len() > MAX_ENV_NAME_LENGTH
                    || !name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
                {
                    return Err(ConfigError::Invalid(format!(
                        "{field}.env must be a valid environment variable name"
                    )));
                }
                Ok(())
            }
            (None, Some(path)) => {
                if path.as_os_str().is_empty() {
                    return Err(ConfigError::Invalid(format!("{field}.file must be non-empty")));
                }
                Ok(())
            }
            _ => Err(ConfigError::Invalid(format!(
                "{field} must set exactly one of env or file"
            ))),
        }
    }

    /// Resolves the secret value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the source is missing, unreadable, empty,
    /// or oversized.
    pub fn resolve(&self, field: &str) -> Result<SecretValue, ConfigError> {
        self.validate(field)?;
        let raw = match (&self.env, &self.file) {
            (Some(name), None) => env::var(name).map_err(|_| {
                ConfigError::Invalid(format!("{field}: environment variable {name} is not set"))
            })?,
            (None, Some(path)) => {
                fs::read_to_string(path).map_err(|err| ConfigError::Io(format!("{field}: {err}")))?
            }
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "{field} must set exactly one of env or file"
                )));
            }
        };
        let value = raw.trim_end();
        if value.is_empty() {
            return Err(ConfigError::Invalid(format!("{field} resolved to an empty secret")));
        }
        if value.len() > MAX_SECRET_BYTES {
            return Err(ConfigError::Invalid(format!("{field} exceeds {MAX_SECRET_BYTES} bytes")));
        }
        Ok(SecretValue(value.to_string()))
    }
}

/// Resolved secret value.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    /// Wraps an in-memory secret.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the secret text.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns a short non-reversible fingerprint for logs.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        secret_fingerprint(&self.0)
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretValue({})", self.fingerprint())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
