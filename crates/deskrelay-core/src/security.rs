// crates/deskrelay-core/src/security.rs
// ============================================================================
// Module: Deskrelay Security Helpers
// Description: Constant-time comparisons and bearer credential checks.
// Purpose: Provide side-channel resistant authentication shared by every hop.
// Dependencies: subtle, sha2
// ============================================================================

//! ## Overview
//! Exposes constant-time equality helpers and a [`BearerCredential`] used by
//! the gateway, the agent, and the relay client. Each surface holds its own
//! credential so that compromising one does not compromise another.
//!
//! Security posture: tokens are compared as SHA-256 digests in constant time
//! so neither content nor length leaks through timing, and rejections carry no
//! detail.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::core::hashing::secret_fingerprint;
use crate::core::hashing::sha256;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted authorization header size.
pub const MAX_AUTH_HEADER_BYTES: usize = 8 * 1024;

// ============================================================================
// SECTION: Constant-Time Comparisons
// ============================================================================

/// Compares two byte slices in constant time.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Compares two strings in constant time.
#[must_use]
pub fn constant_time_eq_str(a: &str, b: &str) -> bool {
    constant_time_eq(a.as_bytes(), b.as_bytes())
}

// ============================================================================
// SECTION: Bearer Credentials
// ============================================================================

/// Authentication failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Credential missing or malformed.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
}

/// Shared-secret bearer credential.
#[derive(Clone)]
pub struct BearerCredential {
    /// Digest of the expected token.
    digest: [u8; 32],
    /// Non-reversible fingerprint for audit logs.
    fingerprint: String,
}

impl BearerCredential {
    /// Creates a credential from the expected token.
    #[must_use]
    pub fn new(token: &str) -> Self {
        Self {
            digest: sha256(token.as_bytes()),
            fingerprint: secret_fingerprint(token),
        }
    }

    /// Returns the credential fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Compares a presented token in constant time.
    #[must_use]
    pub fn authenticate(&self, presented: &str) -> bool {
        constant_time_eq(&self.digest, &sha256(presented.as_bytes()))
    }

    /// Verifies an `Authorization` header value.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthenticated`] when the header is missing,
    /// malformed, or carries the wrong token.
    pub fn verify_header(&self, header: Option<&str>) -> Result<(), AuthError> {
        let token = parse_bearer_token(header)?;
        if self.authenticate(&token) {
            Ok(())
        } else {
            Err(AuthError::Unauthenticated("invalid token".to_string()))
        }
    }
}

impl fmt::Debug for BearerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerCredential").field("fingerprint", &self.fingerprint).finish()
    }
}

/// Extracts the token from a `Bearer` authorization header.
///
/// # Errors
///
/// Returns [`AuthError::Unauthenticated`] when the header is missing, too
/// large, or not a bearer header.
pub fn parse_bearer_token(auth_header: Option<&str>) -> Result<String, AuthError> {
    let header = auth_header
        .ok_or_else(|| AuthError::Unauthenticated("missing authorization".to_string()))?;
    if header.len() > MAX_AUTH_HEADER_BYTES {
        return Err(AuthError::Unauthenticated("authorization header too large".to_string()));
    }
    let mut parts = header.trim().splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default().trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::Unauthenticated("invalid authorization header".to_string()));
    }
    Ok(token.to_string())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
