//! Attestation facade.
//!
//! [`AttestationVerifier`] consumes the challenge, checks the platform it was
//! issued for and dispatches to the platform verifier. Consumption happens
//! before any decoding or cryptography, and exactly-once semantics come from
//! the challenge store alone.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::app_attest::AppAttestVerifier;
use crate::config::{AttestConfig, ConfigError};
use crate::error::{AttestError, Result};
use crate::fingerprint::Fingerprint;
use crate::payload::AttestationPayload;
use crate::platform::Platform;
use crate::play_integrity::{IntegrityTokenDecoder, PlayIntegrityVerifier};
use crate::store::{self, ChallengeStore, DeviceKeyStore, IssuedChallenge, StoreError};
use crate::x509::RootOfTrust;

/// Three-way result for callers that treat re-enrollment separately.
#[derive(Debug)]
pub enum VerificationOutcome {
    Verified(Fingerprint),
    /// The device must discard its key and attest again.
    ReenrollmentRequired,
    Rejected(AttestError),
}

impl VerificationOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified(_))
    }

    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        match self {
            Self::Verified(fp) => Some(fp),
            _ => None,
        }
    }
}

impl From<Result<Fingerprint>> for VerificationOutcome {
    fn from(result: Result<Fingerprint>) -> Self {
        match result {
            Ok(fp) => Self::Verified(fp),
            Err(e) if e.requires_reenrollment() => Self::ReenrollmentRequired,
            Err(e) => Self::Rejected(e),
        }
    }
}

/// Platform-dispatching attestation verifier.
pub struct AttestationVerifier {
    challenges: Arc<dyn ChallengeStore>,
    app_attest: AppAttestVerifier,
    play: Option<PlayIntegrityVerifier>,
    challenge_ttl: Duration,
}

impl AttestationVerifier {
    /// Build a verifier over injected stores.
    ///
    /// Without a `decoder`, Android verification fails with
    /// [`AttestError::UpstreamUnavailable`].
    pub fn new(
        config: &AttestConfig,
        challenges: Arc<dyn ChallengeStore>,
        keys: Arc<dyn DeviceKeyStore>,
        decoder: Option<Arc<dyn IntegrityTokenDecoder>>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let root = RootOfTrust::from_pem(&config.root_ca_pem)
            .map_err(|e| ConfigError::Invalid(format!("root CA: {e}")))?;
        debug!(root = %root.subject(), "Loaded App Attest root of trust");

        let play = decoder.map(|d| PlayIntegrityVerifier::new(d, config.package_name.clone()));
        if play.is_none() {
            warn!("No integrity token decoder configured; Android verification disabled");
        }

        Ok(Self {
            challenges,
            app_attest: AppAttestVerifier::new(keys, root, config.app_id.clone()),
            play,
            challenge_ttl: config.challenge_ttl,
        })
    }

    /// Build stores and the Play Integrity client from configuration.
    ///
    /// Uses PostgreSQL stores when `database_url` is set and the `postgres`
    /// feature is enabled, in-memory stores otherwise.
    pub async fn from_config(config: &AttestConfig) -> std::result::Result<Self, ConfigError> {
        let (challenges, keys) = build_stores(config).await?;
        let decoder = build_decoder(config)?;
        Self::new(config, challenges, keys, decoder)
    }

    /// Issue a challenge for `platform` with the configured lifetime.
    pub async fn issue_challenge(
        &self,
        platform: Platform,
    ) -> std::result::Result<IssuedChallenge, StoreError> {
        store::issue_challenge(self.challenges.as_ref(), platform, self.challenge_ttl).await
    }

    /// Remove expired challenges.
    pub async fn cleanup_expired(&self) -> std::result::Result<u64, StoreError> {
        let removed = self.challenges.cleanup_expired().await?;
        if removed > 0 {
            info!(removed, "Cleaned up expired challenges");
        }
        Ok(removed)
    }

    /// Verify `payload` for `platform` and return the device fingerprint.
    #[instrument(skip_all, fields(platform = %platform))]
    pub async fn verify(
        &self,
        platform: Platform,
        payload: &AttestationPayload,
    ) -> Result<Fingerprint> {
        debug!(fields = %payload.summary(), "Verifying attestation payload");
        self.verify_inner(platform, payload).await.inspect_err(|e| {
            warn!(code = e.code(), error = %e, "Attestation rejected");
        })
    }

    /// Like [`verify`](Self::verify), separating re-enrollment from rejection.
    pub async fn verify_outcome(
        &self,
        platform: Platform,
        payload: &AttestationPayload,
    ) -> VerificationOutcome {
        self.verify(platform, payload).await.into()
    }

    async fn verify_inner(
        &self,
        platform: Platform,
        payload: &AttestationPayload,
    ) -> Result<Fingerprint> {
        payload.validate()?;
        let token = payload.challenge_uuid()?;

        let challenge = self
            .challenges
            .consume(token)
            .await?
            .ok_or(AttestError::ChallengeInvalid)?;
        debug!(%token, "Challenge consumed");

        if challenge.platform != platform.as_str() {
            return Err(AttestError::PlatformMismatch {
                expected: platform,
                issued: challenge.platform,
            });
        }

        let fingerprint = match platform {
            Platform::Android => {
                let play = self.play.as_ref().ok_or_else(|| {
                    AttestError::UpstreamUnavailable("integrity token decoder not configured".into())
                })?;
                let token = payload.integrity_token().ok_or_else(|| {
                    AttestError::InvalidPayload("integrity_token is required".into())
                })?;
                play.verify(token, &challenge.raw_bytes).await?
            }
            Platform::Ios => {
                self.app_attest
                    .verify(payload, &challenge.raw_bytes)
                    .await?
            }
            Platform::Web => {
                return Err(AttestError::UnsupportedPlatform(platform.to_string()));
            }
        };

        info!(platform = %platform, "Attestation verified");
        Ok(fingerprint)
    }
}

type Stores = (Arc<dyn ChallengeStore>, Arc<dyn DeviceKeyStore>);

#[cfg(feature = "postgres")]
async fn build_stores(config: &AttestConfig) -> std::result::Result<Stores, ConfigError> {
    match &config.database_url {
        Some(url) => {
            let pool = store::connect_postgres(url)
                .await
                .map_err(|e| ConfigError::Invalid(format!("database: {e}")))?;
            info!("Using PostgreSQL attestation stores");
            Ok((
                Arc::new(store::PostgresChallengeStore::from_pool(pool.clone())),
                Arc::new(store::PostgresDeviceKeyStore::from_pool(pool)),
            ))
        }
        None => Ok(memory_stores()),
    }
}

#[cfg(not(feature = "postgres"))]
async fn build_stores(config: &AttestConfig) -> std::result::Result<Stores, ConfigError> {
    if config.database_url.is_some() {
        return Err(ConfigError::Invalid(
            "DATABASE_URL is set but the postgres feature is disabled".into(),
        ));
    }
    Ok(memory_stores())
}

fn memory_stores() -> Stores {
    warn!("Using in-memory attestation stores; state is lost on restart");
    (
        Arc::new(store::MemoryChallengeStore::new()),
        Arc::new(store::MemoryDeviceKeyStore::new()),
    )
}

#[cfg(feature = "network")]
fn build_decoder(
    config: &AttestConfig,
) -> std::result::Result<Option<Arc<dyn IntegrityTokenDecoder>>, ConfigError> {
    use crate::play_integrity::PlayIntegrityClient;

    match config.read_service_account()? {
        Some(json) => {
            let client = PlayIntegrityClient::new(&json, config.play_timeout)?;
            Ok(Some(Arc::new(client)))
        }
        None => Ok(None),
    }
}

#[cfg(not(feature = "network"))]
fn build_decoder(
    _config: &AttestConfig,
) -> std::result::Result<Option<Arc<dyn IntegrityTokenDecoder>>, ConfigError> {
    Ok(None)
}
