//! Devattest Core - mobile device attestation verification
//!
//! Verifies that a request comes from a genuine, unmodified build of an app
//! running on a genuine device, bound to a single-use server challenge.
//!
//! # Features
//!
//! - Android Play Integrity token verdict and request-hash checks
//! - iOS App Attest enrollment (certificate chain, nonce, COSE key) and
//!   assertion (ECDSA P-256 with low-S normalization)
//! - Single-use challenges with atomic consumption
//! - In-memory and PostgreSQL stores for challenges and device keys
//! - Stable, sanitized client error codes
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use devattest_core::{
//!     AttestConfig, AttestationPayload, AttestationVerifier, MemoryChallengeStore,
//!     MemoryDeviceKeyStore, Platform,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let verifier = AttestationVerifier::new(
//!     &AttestConfig::default(),
//!     Arc::new(MemoryChallengeStore::new()),
//!     Arc::new(MemoryDeviceKeyStore::new()),
//!     None,
//! )?;
//!
//! // Hand `issued.token` and `issued.client_challenge` to the app
//! let issued = verifier.issue_challenge(Platform::Ios).await?;
//!
//! // ... the app attests and sends back a payload
//! let payload = AttestationPayload {
//!     challenge_token: issued.token.to_string(),
//!     ..Default::default()
//! };
//! let fingerprint = verifier.verify(Platform::Ios, &payload).await?;
//! println!("device: {fingerprint}");
//! # Ok(())
//! # }
//! ```

pub mod app_attest;
pub mod codec;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod payload;
pub mod platform;
pub mod play_integrity;
pub mod store;
pub mod verifier;
pub mod x509;

// Re-export main types for convenience
pub use app_attest::{
    check_stored_key, key_id_for_der, rp_id_hash, verify_assertion, verify_attestation_object,
    AppAttestVerifier, EnrolledKey, VerifiedAssertion,
};
pub use config::{AttestConfig, ConfigError};
pub use error::{AttestError, ChainValidationReason, DecodeError, Result, VerdictFailure};
pub use fingerprint::Fingerprint;
pub use payload::{decode_flex_b64, AttestationPayload};
pub use platform::Platform;
pub use play_integrity::{
    IntegrityTokenDecoder, MockIntegrityDecoder, PlayIntegrityVerifier, TokenPayloadExternal,
};
pub use store::{
    issue_challenge, ChallengeStore, ConsumedChallenge, DeviceKeyStore, IssuedChallenge,
    MemoryChallengeStore, MemoryDeviceKeyStore, StoreError,
};
pub use verifier::{AttestationVerifier, VerificationOutcome};
pub use x509::RootOfTrust;

#[cfg(feature = "network")]
pub use play_integrity::PlayIntegrityClient;

#[cfg(feature = "postgres")]
pub use store::{connect_postgres, PostgresChallengeStore, PostgresDeviceKeyStore};
