//! Challenge and device key stores
//!
//! The verifier depends on two collaborators, injected as trait objects:
//! - **ChallengeStore**: single-use challenges bound to a platform. `consume`
//!   must be atomic; it is the only exactly-once mechanism in the system.
//! - **DeviceKeyStore**: one App Attest public key per key identifier.
//!
//! Two backends are provided: [`MemoryChallengeStore`] / [`MemoryDeviceKeyStore`]
//! for development and tests, and PostgreSQL stores behind the `postgres`
//! feature.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::{MemoryChallengeStore, MemoryDeviceKeyStore};
#[cfg(feature = "postgres")]
pub use postgres::{connect as connect_postgres, PostgresChallengeStore, PostgresDeviceKeyStore};

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::platform::Platform;

/// Length of the random challenge material.
pub const CHALLENGE_LEN: usize = 32;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Database migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Entropy source error: {0}")]
    Entropy(String),
}

/// Single-use challenge as persisted by a [`ChallengeStore`].
#[derive(Debug, Clone)]
pub struct Challenge {
    pub token: Uuid,
    pub raw_bytes: Vec<u8>,
    pub platform: Platform,
    pub expires_at: DateTime<Utc>,
}

/// Result of consuming a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedChallenge {
    pub raw_bytes: Vec<u8>,
    /// Platform string as stored.
    pub platform: String,
}

#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Persist a freshly issued challenge.
    async fn create(&self, challenge: Challenge) -> Result<(), StoreError>;

    /// Atomically remove and return an unexpired challenge.
    ///
    /// Unknown, expired and already consumed tokens all yield `Ok(None)`.
    async fn consume(&self, token: Uuid) -> Result<Option<ConsumedChallenge>, StoreError>;

    /// Delete expired challenges. Returns how many were removed.
    async fn cleanup_expired(&self) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait DeviceKeyStore: Send + Sync {
    /// DER SubjectPublicKeyInfo stored for `key_id`.
    async fn lookup(&self, key_id: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Insert or replace the key and refresh `last_seen`.
    async fn save(&self, key_id: &[u8], public_key_der: &[u8]) -> Result<(), StoreError>;
}

/// Challenge handed to the client.
#[derive(Debug, Clone)]
pub struct IssuedChallenge {
    pub token: Uuid,
    /// Value the app binds into its attestation. Android receives
    /// `base64url(sha256(raw))` for the integrity request hash; other
    /// platforms receive `base64url(raw)`.
    pub client_challenge: String,
    pub platform: Platform,
    pub expires_at: DateTime<Utc>,
}

/// Generate and persist a new challenge for `platform`.
#[instrument(level = "debug", skip_all, fields(platform = %platform, ttl_secs = ttl.as_secs()))]
pub async fn issue_challenge(
    store: &dyn ChallengeStore,
    platform: Platform,
    ttl: Duration,
) -> Result<IssuedChallenge, StoreError> {
    let mut raw = vec![0u8; CHALLENGE_LEN];
    getrandom::fill(&mut raw).map_err(|e| StoreError::Entropy(e.to_string()))?;

    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| StoreError::Query(format!("invalid ttl: {e}")))?;
    let token = Uuid::new_v4();
    let expires_at = Utc::now() + ttl;

    let client_challenge = match platform {
        Platform::Android => URL_SAFE_NO_PAD.encode(Sha256::digest(&raw)),
        Platform::Ios | Platform::Web => URL_SAFE_NO_PAD.encode(&raw),
    };

    store
        .create(Challenge {
            token,
            raw_bytes: raw,
            platform,
            expires_at,
        })
        .await?;

    debug!(%token, "Issued attestation challenge");
    Ok(IssuedChallenge {
        token,
        client_challenge,
        platform,
        expires_at,
    })
}
