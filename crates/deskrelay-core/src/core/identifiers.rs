// crates/deskrelay-core/src/core/identifiers.rs
// ============================================================================
// Module: Deskrelay Identifiers
// Description: Canonical identifiers for projects, invocations, and keys.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde, uuid
// ============================================================================

//! ## Overview
//! Identifiers used across the sandbox control plane. Project identifiers are
//! validated because they are embedded into container and network names;
//! invocation and key identifiers are opaque.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum project identifier length (bytes).
pub const MAX_PROJECT_ID_LENGTH: usize = 63;
/// Maximum invocation identifier length (bytes).
pub const MAX_INVOCATION_ID_LENGTH: usize = 128;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Identifier validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// Identifier was empty.
    #[error("identifier must not be empty")]
    Empty,
    /// Identifier exceeded the length limit.
    #[error("identifier exceeds {max} bytes")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
    /// Identifier contained a disallowed character.
    #[error("identifier contains invalid character: {0}")]
    InvalidCharacter(char),
    /// Identifier must start with an alphanumeric character.
    #[error("identifier must start with an ASCII alphanumeric character")]
    InvalidStart,
}

// ============================================================================
// SECTION: Project Identifier
// ============================================================================

/// Tenant project identifier.
///
/// Project identifiers become part of Docker network and container names, so
/// they are restricted to ASCII alphanumerics plus `-`, `_`, and `.`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectId(String);

impl ProjectId {
    /// Creates a validated project identifier.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the value is not a valid project id.
    pub fn new(id: impl Into<String>) -> Result<Self, IdentifierError> {
        let id = id.into();
        validate_project_id(&id)?;
        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ProjectId {
    type Err = IdentifierError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::new(value)
    }
}

impl TryFrom<String> for ProjectId {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProjectId> for String {
    fn from(value: ProjectId) -> Self {
        value.0
    }
}

/// Validates a project identifier.
fn validate_project_id(id: &str) -> Result<(), IdentifierError> {
    let Some(first) = id.chars().next() else {
        return Err(IdentifierError::Empty);
    };
    if id.len() > MAX_PROJECT_ID_LENGTH {
        return Err(IdentifierError::TooLong {
            max: MAX_PROJECT_ID_LENGTH,
        });
    }
    if !first.is_ascii_alphanumeric() {
        return Err(IdentifierError::InvalidStart);
    }
    if let Some(bad) = id.chars().find(|ch| !is_project_char(*ch)) {
        return Err(IdentifierError::InvalidCharacter(bad));
    }
    Ok(())
}

/// Returns true for characters allowed in project identifiers.
const fn is_project_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.')
}

// ============================================================================
// SECTION: Invocation Identifier
// ============================================================================

/// Tool invocation identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InvocationId(String);

impl InvocationId {
    /// Creates an invocation identifier from a caller-supplied value.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError`] when the value is empty, too long, or
    /// contains control characters.
    pub fn new(id: impl Into<String>) -> Result<Self, IdentifierError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if id.len() > MAX_INVOCATION_ID_LENGTH {
            return Err(IdentifierError::TooLong {
                max: MAX_INVOCATION_ID_LENGTH,
            });
        }
        if let Some(bad) = id.chars().find(|ch| ch.is_control() || ch.is_whitespace()) {
            return Err(IdentifierError::InvalidCharacter(bad));
        }
        Ok(Self(id))
    }

    /// Generates a fresh random invocation identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for InvocationId {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<InvocationId> for String {
    fn from(value: InvocationId) -> Self {
        value.0
    }
}

// ============================================================================
// SECTION: Key Identifier
// ============================================================================

/// Identifier for a pre-distributed envelope key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    /// Creates a new key identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
