//! Verification error taxonomy.
//!
//! [`AttestError`] is the only error type that crosses the verifier boundary.
//! Each variant maps to a stable, non-revealing client code via
//! [`AttestError::code`]; the `Display` output carries the internal reason
//! and is meant for logs only.

use thiserror::Error;

use crate::platform::Platform;
use crate::store::StoreError;

/// Errors returned by attestation verification.
#[derive(Debug, Error)]
pub enum AttestError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Challenge not found, expired or already consumed")]
    ChallengeInvalid,

    #[error("Challenge platform mismatch: verifying {expected}, issued for {issued}")]
    PlatformMismatch { expected: Platform, issued: String },

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Integrity decoding service unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Integrity verdict failed: {0}")]
    VerdictFailed(#[from] VerdictFailure),

    #[error("Integrity token is not bound to the issued challenge")]
    RequestBindingFailed,

    #[error("Certificate chain invalid: {0}")]
    CertificateInvalid(#[from] ChainValidationReason),

    #[error("Unsupported attestation format: {0:?}")]
    UnsupportedFormat(String),

    #[error("Nonce extension missing from credential certificate")]
    NonceExtensionMissing,

    #[error("Nonce extension has {got} bytes, expected 32")]
    NonceLengthInvalid { got: usize },

    #[error("Nonce does not match authenticator data and challenge")]
    NonceMismatch,

    #[error("rpIdHash does not match the application identifier")]
    RpIdMismatch,

    #[error("Key identifier does not match the public key")]
    KeyIdMismatch,

    #[error("Client data challenge does not match the issued challenge")]
    ChallengeMismatch,

    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("No enrolled key for assertion; re-attestation required")]
    KeyNotFoundForAssertion,

    #[error("Attestation and enrollment state disagree")]
    InvalidAttestationState,

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl AttestError {
    /// Stable error code for programmatic handling by clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::ChallengeInvalid => "CHALLENGE_INVALID",
            Self::PlatformMismatch { .. } => "PLATFORM_MISMATCH",
            Self::UnsupportedPlatform(_) => "UNSUPPORTED_PLATFORM",
            Self::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            Self::VerdictFailed(_) => "VERDICT_FAILED",
            Self::RequestBindingFailed => "REQUEST_BINDING_FAILED",
            Self::CertificateInvalid(_) => "CERTIFICATE_INVALID",
            Self::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            Self::NonceExtensionMissing => "NONCE_EXTENSION_MISSING",
            Self::NonceLengthInvalid { .. } => "NONCE_LENGTH_INVALID",
            Self::NonceMismatch => "NONCE_MISMATCH",
            Self::RpIdMismatch => "RP_ID_MISMATCH",
            Self::KeyIdMismatch => "KEY_ID_MISMATCH",
            Self::ChallengeMismatch => "CHALLENGE_MISMATCH",
            Self::SignatureInvalid(_) => "SIGNATURE_INVALID",
            Self::KeyNotFoundForAssertion => "KEY_NOT_FOUND_FOR_ASSERTION",
            Self::InvalidAttestationState => "INVALID_ATTESTATION_STATE",
            Self::StoreUnavailable(_) => "INTERNAL_ERROR",
        }
    }

    /// Sanitized message safe to return to the client.
    ///
    /// Never includes parse details, verdict contents or store errors.
    pub fn client_message(&self) -> &'static str {
        match self {
            Self::InvalidPayload(_) => "Invalid attestation payload",
            Self::ChallengeInvalid => "Challenge is invalid or expired",
            Self::PlatformMismatch { .. } => "Challenge was issued for another platform",
            Self::UnsupportedPlatform(_) => "Unsupported platform",
            Self::UpstreamUnavailable(_) => "Attestation service temporarily unavailable",
            Self::VerdictFailed(_) | Self::RequestBindingFailed => "Device integrity check failed",
            Self::KeyNotFoundForAssertion => "Attestation key not found; re-attestation required",
            Self::InvalidAttestationState => "Unexpected attestation state",
            Self::StoreUnavailable(_) => "Internal error",
            Self::CertificateInvalid(_)
            | Self::UnsupportedFormat(_)
            | Self::NonceExtensionMissing
            | Self::NonceLengthInvalid { .. }
            | Self::NonceMismatch
            | Self::RpIdMismatch
            | Self::KeyIdMismatch
            | Self::ChallengeMismatch
            | Self::SignatureInvalid(_) => "Device attestation failed",
        }
    }

    /// True when the client should discard its key and attest again.
    pub fn requires_reenrollment(&self) -> bool {
        matches!(self, Self::KeyNotFoundForAssertion)
    }

    /// True for failures caused by an unavailable dependency rather than the
    /// request itself. Callers may retry with a fresh challenge.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable(_) | Self::StoreUnavailable(_))
    }
}

impl From<DecodeError> for AttestError {
    fn from(err: DecodeError) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

// =============================================================================
// VerdictFailure
// =============================================================================

/// Specific Play Integrity verdict that failed. Logged, never sent to clients.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerdictFailure {
    #[error("decoded token payload is empty")]
    EmptyPayload,

    #[error("device integrity not met: {verdicts:?}")]
    DeviceIntegrityNotMet { verdicts: Vec<String> },

    #[error("app not licensed: {verdict:?}")]
    AppNotLicensed { verdict: String },

    #[error("app not recognized by Play: {verdict:?}")]
    AppNotRecognized { verdict: String },

    #[error("package name mismatch: expected {expected}, got {got:?}")]
    PackageNameMismatch { expected: String, got: String },

    #[error("request timestamp missing")]
    TimestampMissing,

    #[error("token too old: {age_ms} ms")]
    TokenTooOld { age_ms: i64 },

    #[error("token timestamp {skew_ms} ms in the future")]
    TokenFromFuture { skew_ms: i64 },
}

// =============================================================================
// ChainValidationReason
// =============================================================================

#[derive(Debug, Error)]
pub enum ChainValidationReason {
    #[error("attestation statement has no certificates")]
    EmptyChain,

    #[error("chain depth {depth} exceeds maximum {max}")]
    ChainTooDeep { depth: usize, max: usize },

    #[error("certificate {index} is not valid DER: {reason}")]
    InvalidDer { index: usize, reason: String },

    #[error("root certificate could not be loaded: {0}")]
    RootUnavailable(String),

    #[error("certificate {index} issuer does not match its parent's subject")]
    IssuerMismatch { index: usize },

    #[error("certificate {index} is not a CA but issued another certificate")]
    CaMissingCaFlag { index: usize },

    #[error("certificate {index} signature verification failed")]
    SignatureVerificationFailed { index: usize },

    #[error("unsupported signature algorithm: {oid}")]
    UnsupportedAlgorithm { oid: String },

    #[error("certificate {index} has an unsupported public key")]
    UnsupportedKey { index: usize },

    #[error("certificate {index} is not yet valid")]
    CertNotYetValid { index: usize },

    #[error("certificate {index} has expired")]
    CertExpired { index: usize },
}

// =============================================================================
// DecodeError
// =============================================================================

/// Structural decoding failures in untrusted binary input.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("{field} is not valid base64: {reason}")]
    Base64 { field: &'static str, reason: String },

    #[error("CBOR decoding failed: {0}")]
    Cbor(String),

    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("field {0} has an unexpected type")]
    WrongType(&'static str),

    #[error("authenticator data is {len} bytes, need at least {min}")]
    AuthDataTooShort { len: usize, min: usize },

    #[error("credential id length overflows authenticator data")]
    CredentialIdOverflow,

    #[error("COSE key invalid: {0}")]
    CoseKey(String),

    #[error("client data invalid: {0}")]
    ClientData(String),

    #[error("ASN.1 decoding failed: {0}")]
    Asn1(String),

    #[error("public key invalid: {0}")]
    PublicKey(String),
}

pub type Result<T> = std::result::Result<T, AttestError>;
