// crates/deskrelay-core/src/core/envelope.rs
// ============================================================================
// Module: Deskrelay Execution Envelopes
// Description: AES-256-GCM sealed primitive commands with bound headers.
// Purpose: Carry one primitive action from gateway to agent opaquely.
// Dependencies: base64, ring, serde, serde_jcs
// ============================================================================

//! ## Overview
//! An [`ExecutionEnvelope`] holds a primitive command encrypted under a
//! pre-distributed symmetric key. The cleartext header (invocation, target,
//! issue time, timeout, key id) is bound as AEAD associated data using its
//! canonical JSON form, so altering any header field makes the envelope fail
//! to open.
//!
//! Security posture: open failures collapse into a single
//! [`EnvelopeError::Rejected`] so callers cannot distinguish wrong keys from
//! tampering.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ring::aead::AES_256_GCM;
use ring::aead::Aad;
use ring::aead::LessSafeKey;
use ring::aead::NONCE_LEN;
use ring::aead::Nonce;
use ring::aead::UnboundKey;
use ring::rand::SecureRandom;
use ring::rand::SystemRandom;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::hashing::canonical_json_bytes;
use crate::core::identifiers::InvocationId;
use crate::core::identifiers::KeyId;
use crate::core::identifiers::ProjectId;
use crate::core::primitives::PrimitiveCommand;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;
/// Required symmetric key length in bytes.
pub const ENVELOPE_KEY_LEN: usize = 32;
/// Maximum decoded ciphertext size accepted by [`open_value`].
pub const MAX_CIPHERTEXT_BYTES: usize = 256 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Envelope sealing and opening errors.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Key material was invalid.
    #[error("invalid envelope key: {0}")]
    InvalidKey(String),
    /// Sealing failed.
    #[error("envelope sealing failed: {0}")]
    Seal(String),
    /// The envelope could not be opened.
    #[error("envelope rejected")]
    Rejected,
    /// The envelope opened but its payload was not a valid command.
    #[error("invalid envelope payload: {0}")]
    Payload(String),
}

// ============================================================================
// SECTION: Keys
// ============================================================================

/// Pre-distributed AES-256-GCM key.
pub struct EnvelopeKey {
    /// Key identifier carried in envelope headers.
    key_id: KeyId,
    /// Prepared AEAD key.
    key: LessSafeKey,
}

impl EnvelopeKey {
    /// Builds a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidKey`] when the length is not 32 bytes.
    pub fn from_bytes(key_id: KeyId, bytes: &[u8]) -> Result<Self, EnvelopeError> {
        if bytes.len() != ENVELOPE_KEY_LEN {
            return Err(EnvelopeError::InvalidKey(format!(
                "expected {ENVELOPE_KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let unbound = UnboundKey::new(&AES_256_GCM, bytes)
            .map_err(|_| EnvelopeError::InvalidKey("key rejected by cipher".to_string()))?;
        Ok(Self {
            key_id,
            key: LessSafeKey::new(unbound),
        })
    }

    /// Builds a key from standard base64 text.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidKey`] when decoding fails or the length
    /// is wrong.
    pub fn from_base64(key_id: KeyId, encoded: &str) -> Result<Self, EnvelopeError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| EnvelopeError::InvalidKey("key is not valid base64".to_string()))?;
        Self::from_bytes(key_id, &bytes)
    }

    /// Generates fresh random key material encoded as base64.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Seal`] when the system RNG fails.
    pub fn generate_base64() -> Result<String, EnvelopeError> {
        let mut bytes = [0_u8; ENVELOPE_KEY_LEN];
        SystemRandom::new()
            .fill(&mut bytes)
            .map_err(|_| EnvelopeError::Seal("system rng unavailable".to_string()))?;
        Ok(STANDARD.encode(bytes))
    }

    /// Returns the key identifier.
    #[must_use]
    pub const fn key_id(&self) -> &KeyId {
        &self.key_id
    }
}

impl fmt::Debug for EnvelopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeKey").field("key_id", &self.key_id).finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Envelope
// ============================================================================

/// Agent the envelope is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeTarget {
    /// Project whose guest agent may open the envelope.
    pub project_id: ProjectId,
}

/// Sealed primitive command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionEnvelope {
    /// Envelope format version.
    pub version: u8,
    /// Invocation that produced the envelope.
    pub invocation_id: InvocationId,
    /// Target agent reference.
    pub target: EnvelopeTarget,
    /// Issue time (milliseconds since epoch).
    pub issued_at_ms: u64,
    /// Execution ceiling for the primitive (milliseconds).
    pub timeout_ms: u64,
    /// Key identifier used for sealing.
    pub key_id: KeyId,
    /// Base64 AEAD nonce.
    pub nonce: String,
    /// Base64 ciphertext with the authentication tag appended.
    pub ciphertext: String,
}

impl ExecutionEnvelope {
    /// Returns the instant (milliseconds since epoch) after which the envelope is stale.
    #[must_use]
    pub const fn expires_at_ms(&self) -> u64 {
        self.issued_at_ms.saturating_add(self.timeout_ms)
    }

    /// Returns the header bound as associated data.
    fn header(&self) -> EnvelopeHeader<'_> {
        EnvelopeHeader {
            version: self.version,
            invocation_id: &self.invocation_id,
            target: &self.target,
            issued_at_ms: self.issued_at_ms,
            timeout_ms: self.timeout_ms,
            key_id: &self.key_id,
        }
    }
}

/// Header fields authenticated alongside the ciphertext.
#[derive(Serialize)]
struct EnvelopeHeader<'a> {
    /// Envelope format version.
    version: u8,
    /// Invocation identifier.
    invocation_id: &'a InvocationId,
    /// Target agent.
    target: &'a EnvelopeTarget,
    /// Issue time.
    issued_at_ms: u64,
    /// Execution ceiling.
    timeout_ms: u64,
    /// Key identifier.
    key_id: &'a KeyId,
}

/// Inputs for sealing an envelope.
#[derive(Debug, Clone)]
pub struct SealRequest {
    /// Invocation identifier.
    pub invocation_id: InvocationId,
    /// Target agent.
    pub target: EnvelopeTarget,
    /// Issue time (milliseconds since epoch).
    pub issued_at_ms: u64,
    /// Execution ceiling (milliseconds).
    pub timeout_ms: u64,
}

// ============================================================================
// SECTION: Seal / Open
// ============================================================================

/// Seals primitive commands with a shared key and a system RNG.
pub struct EnvelopeSealer {
    /// Sealing key.
    key: EnvelopeKey,
    /// Nonce source.
    rng: SystemRandom,
}

impl EnvelopeSealer {
    /// Creates a sealer for the given key.
    #[must_use]
    pub fn new(key: EnvelopeKey) -> Self {
        Self {
            key,
            rng: SystemRandom::new(),
        }
    }

    /// Returns the key identifier used for sealing.
    #[must_use]
    pub const fn key_id(&self) -> &KeyId {
        self.key.key_id()
    }

    /// Encrypts a primitive command into an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Seal`] when serialization, nonce generation, or
    /// encryption fails.
    pub fn seal(
        &self,
        request: SealRequest,
        command: &PrimitiveCommand,
    ) -> Result<ExecutionEnvelope, EnvelopeError> {
        let plaintext =
            serde_json::to_vec(command).map_err(|err| EnvelopeError::Seal(err.to_string()))?;
        self.seal_bytes(request, plaintext)
    }

    /// Encrypts an arbitrary JSON payload into an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Seal`] when serialization, nonce generation, or
    /// encryption fails.
    pub fn seal_value(
        &self,
        request: SealRequest,
        payload: &Value,
    ) -> Result<ExecutionEnvelope, EnvelopeError> {
        let plaintext =
            serde_json::to_vec(payload).map_err(|err| EnvelopeError::Seal(err.to_string()))?;
        self.seal_bytes(request, plaintext)
    }

    /// Encrypts serialized plaintext under a fresh nonce.
    fn seal_bytes(
        &self,
        request: SealRequest,
        mut in_out: Vec<u8>,
    ) -> Result<ExecutionEnvelope, EnvelopeError> {
        let mut nonce_bytes = [0_u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| EnvelopeError::Seal("system rng unavailable".to_string()))?;
        let mut envelope = ExecutionEnvelope {
            version: ENVELOPE_VERSION,
            invocation_id: request.invocation_id,
            target: request.target,
            issued_at_ms: request.issued_at_ms,
            timeout_ms: request.timeout_ms,
            key_id: self.key.key_id.clone(),
            nonce: STANDARD.encode(nonce_bytes),
            ciphertext: String::new(),
        };
        let aad = canonical_json_bytes(&envelope.header())
            .map_err(|err| EnvelopeError::Seal(err.to_string()))?;
        self.key
            .key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(aad.as_slice()),
                &mut in_out,
            )
            .map_err(|_| EnvelopeError::Seal("encryption failed".to_string()))?;
        envelope.ciphertext = STANDARD.encode(&in_out);
        Ok(envelope)
    }
}

impl fmt::Debug for EnvelopeSealer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeSealer").field("key", &self.key).finish_non_exhaustive()
    }
}

/// Decrypts an envelope into its raw JSON payload.
///
/// # Errors
///
/// Returns [`EnvelopeError::Rejected`] for any version, key, encoding, or
/// authentication failure.
pub fn open_value(key: &EnvelopeKey, envelope: &ExecutionEnvelope) -> Result<Value, EnvelopeError> {
    if envelope.version != ENVELOPE_VERSION || envelope.key_id != key.key_id {
        return Err(EnvelopeError::Rejected);
    }
    let nonce_bytes = STANDARD.decode(&envelope.nonce).map_err(|_| EnvelopeError::Rejected)?;
    let nonce = Nonce::try_assume_unique_for_key(&nonce_bytes).map_err(|_| EnvelopeError::Rejected)?;
    let mut in_out = STANDARD.decode(&envelope.ciphertext).map_err(|_| EnvelopeError::Rejected)?;
    if in_out.len() > MAX_CIPHERTEXT_BYTES {
        return Err(EnvelopeError::Rejected);
    }
    let aad = canonical_json_bytes(&envelope.header()).map_err(|_| EnvelopeError::Rejected)?;
    let plaintext = key
        .key
        .open_in_place(nonce, Aad::from(aad.as_slice()), &mut in_out)
        .map_err(|_| EnvelopeError::Rejected)?;
    serde_json::from_slice(plaintext).map_err(|_| EnvelopeError::Rejected)
}

/// Decrypts an envelope into a primitive command.
///
/// # Errors
///
/// Returns [`EnvelopeError::Rejected`] when the envelope cannot be opened and
/// [`EnvelopeError::Payload`] when the plaintext is not a known command.
pub fn open(key: &EnvelopeKey, envelope: &ExecutionEnvelope) -> Result<PrimitiveCommand, EnvelopeError> {
    let value = open_value(key, envelope)?;
    serde_json::from_value(value).map_err(|err| EnvelopeError::Payload(err.to_string()))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions."
    )]

    use proptest::prelude::*;

    use super::*;
    use crate::core::primitives::CaptureOptions;
    use crate::core::primitives::MouseButton;
    use crate::core::primitives::Point;
    use crate::core::primitives::ScrollDirection;

    fn key(seed: u8) -> EnvelopeKey {
        EnvelopeKey::from_bytes(KeyId::new("k1"), &[seed; ENVELOPE_KEY_LEN]).unwrap()
    }

    fn request() -> SealRequest {
        SealRequest {
            invocation_id: InvocationId::new("inv-1").unwrap(),
            target: EnvelopeTarget {
                project_id: ProjectId::new("p1").unwrap(),
            },
            issued_at_ms: 1_000,
            timeout_ms: 30_000,
        }
    }

    fn shell(command: &str) -> PrimitiveCommand {
        PrimitiveCommand::Shell {
            command: command.to_string(),
        }
    }

    #[test]
    fn wrong_key_is_rejected() {
        let envelope = EnvelopeSealer::new(key(1)).seal(request(), &shell("dir")).unwrap();
        assert!(matches!(open(&key(2), &envelope), Err(EnvelopeError::Rejected)));
    }

    #[test]
    fn tampered_header_is_rejected() {
        let mut envelope = EnvelopeSealer::new(key(1)).seal(request(), &shell("dir")).unwrap();
        envelope.timeout_ms = 300_000;
        assert!(matches!(open(&key(1), &envelope), Err(EnvelopeError::Rejected)));
    }

    #[test]
    fn corrupted_ciphertext_is_rejected() {
        let mut envelope = EnvelopeSealer::new(key(1)).seal(request(), &shell("dir")).unwrap();
        let mut raw = STANDARD.decode(&envelope.ciphertext).unwrap();
        raw[0] ^= 0xff;
        envelope.ciphertext = STANDARD.encode(raw);
        assert!(matches!(open(&key(1), &envelope), Err(EnvelopeError::Rejected)));
        envelope.ciphertext = "not base64!".to_string();
        assert!(matches!(open(&key(1), &envelope), Err(EnvelopeError::Rejected)));
    }

    #[test]
    fn serialized_envelope_carries_no_plaintext() {
        let envelope =
            EnvelopeSealer::new(key(1)).seal(request(), &shell("secret-routine --fast")).unwrap();
        let wire = serde_json::to_string(&envelope).unwrap();
        assert!(!wire.contains("secret-routine"));
        assert!(!wire.contains("shell"));
    }

    #[test]
    fn nonces_differ_between_seals() {
        let sealer = EnvelopeSealer::new(key(1));
        let first = sealer.seal(request(), &shell("a")).unwrap();
        let second = sealer.seal(request(), &shell("a")).unwrap();
        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn short_keys_are_refused() {
        assert!(matches!(
            EnvelopeKey::from_bytes(KeyId::new("k"), &[0_u8; 16]),
            Err(EnvelopeError::InvalidKey(_))
        ));
        let generated = EnvelopeKey::generate_base64().unwrap();
        assert!(EnvelopeKey::from_base64(KeyId::new("k"), &generated).is_ok());
    }

    fn point() -> impl Strategy<Value = Point> {
        (-4_000_i32..4_000, -4_000_i32..4_000).prop_map(|(x, y)| Point::new(x, y))
    }

    fn command() -> impl Strategy<Value = PrimitiveCommand> {
        prop_oneof![
            (prop::collection::vec(point(), 1..30), 0_u64..100).prop_map(
                |(path, step_delay_ms)| PrimitiveCommand::PointerMove {
                    path,
                    step_delay_ms
                }
            ),
            (point(), 1_u8..=2, prop::collection::vec(point(), 0..5)).prop_map(
                |(target, count, approach)| PrimitiveCommand::Click {
                    target,
                    button: MouseButton::Right,
                    count,
                    approach,
                    step_delay_ms: 10,
                }
            ),
            Just(PrimitiveCommand::PointerPosition),
            prop::collection::vec("[a-z]{1,6}", 1..4)
                .prop_map(|keys| PrimitiveCommand::KeyPress { keys }),
            (".{0,64}", 0_u64..200)
                .prop_map(|(text, interval_ms)| PrimitiveCommand::TypeText { text, interval_ms }),
            (1_u32..20, prop::option::of(point())).prop_map(|(clicks, at)| {
                PrimitiveCommand::Scroll {
                    direction: ScrollDirection::Up,
                    clicks,
                    at,
                }
            }),
            any::<bool>().prop_map(|include_ocr| PrimitiveCommand::Capture(CaptureOptions {
                include_image: true,
                include_ocr,
                include_ui_elements: !include_ocr,
                ocr_min_confidence: 30.0,
                max_text_blocks: 200,
            })),
            ".{0,128}".prop_map(|command| PrimitiveCommand::Shell { command }),
        ]
    }

    proptest! {
        #[test]
        fn open_inverts_seal(command in command()) {
            let sealer = EnvelopeSealer::new(key(7));
            let envelope = sealer.seal(request(), &command).expect("seal");
            let opened = open(&key(7), &envelope).expect("open");
            prop_assert_eq!(opened, command);
        }
    }
}
