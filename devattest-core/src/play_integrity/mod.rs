//! Android Play Integrity verification.
//!
//! The integrity token is opaque to us: it is decoded remotely by Google,
//! scoped to our package name, and the returned verdicts are checked here.
//!
//! ## Checks (first failure wins)
//!
//! 1. device recognition verdict contains `MEETS_DEVICE_INTEGRITY`
//! 2. app licensing verdict is exactly `LICENSED`
//! 3. app recognition verdict is `PLAY_RECOGNIZED`
//! 4. request package name equals the configured package
//! 5. request timestamp is within [`MAX_TOKEN_AGE`] of now
//! 6. request hash equals `base64url(sha256(raw_challenge))`, compared in
//!    constant time

#[cfg(feature = "network")]
mod client;
mod mock;

#[cfg(feature = "network")]
pub use client::{PlayIntegrityClient, ServiceAccountKey};
pub use mock::MockIntegrityDecoder;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, info, instrument, warn};

use crate::error::{AttestError, Result, VerdictFailure};
use crate::fingerprint::Fingerprint;

/// Maximum age of an integrity token's request timestamp.
pub const MAX_TOKEN_AGE: Duration = Duration::from_secs(5 * 60);

pub const MEETS_DEVICE_INTEGRITY: &str = "MEETS_DEVICE_INTEGRITY";
pub const LICENSED: &str = "LICENSED";
pub const PLAY_RECOGNIZED: &str = "PLAY_RECOGNIZED";

// =============================================================================
// Decoded token payload
// =============================================================================

/// `decodeIntegrityToken` response body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeIntegrityTokenResponse {
    #[serde(default)]
    pub token_payload_external: Option<TokenPayloadExternal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayloadExternal {
    #[serde(default)]
    pub request_details: RequestDetails,
    #[serde(default)]
    pub app_integrity: AppIntegrity,
    #[serde(default)]
    pub device_integrity: DeviceIntegrity,
    #[serde(default)]
    pub account_details: AccountDetails,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetails {
    #[serde(default)]
    pub request_package_name: String,
    #[serde(default)]
    pub request_hash: Option<String>,
    /// Milliseconds since the epoch. Google encodes int64 as a JSON string.
    #[serde(default, deserialize_with = "deserialize_millis")]
    pub timestamp_millis: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppIntegrity {
    #[serde(default)]
    pub app_recognition_verdict: String,
    #[serde(default)]
    pub package_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIntegrity {
    #[serde(default)]
    pub device_recognition_verdict: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDetails {
    #[serde(default)]
    pub app_licensing_verdict: String,
}

fn deserialize_millis<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Millis {
        Text(String),
        Number(i64),
    }

    match Option::<Millis>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Millis::Number(n)) => Ok(Some(n)),
        Some(Millis::Text(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

// =============================================================================
// Decoder seam
// =============================================================================

/// Remote integrity token decoding.
///
/// Implementations map every transport or remote failure to
/// [`AttestError::UpstreamUnavailable`] and never retry.
#[async_trait]
pub trait IntegrityTokenDecoder: Send + Sync {
    async fn decode(
        &self,
        package_name: &str,
        integrity_token: &str,
    ) -> Result<Option<TokenPayloadExternal>>;
}

// =============================================================================
// Verifier
// =============================================================================

/// Verifies Play Integrity tokens against a consumed challenge.
pub struct PlayIntegrityVerifier {
    decoder: Arc<dyn IntegrityTokenDecoder>,
    package_name: String,
}

impl PlayIntegrityVerifier {
    pub fn new(decoder: Arc<dyn IntegrityTokenDecoder>, package_name: impl Into<String>) -> Self {
        Self {
            decoder,
            package_name: package_name.into(),
        }
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    /// Decode `integrity_token` and check it against `raw_challenge`.
    #[instrument(level = "debug", skip_all, fields(package = %self.package_name, token_len = integrity_token.len()))]
    pub async fn verify(&self, integrity_token: &str, raw_challenge: &[u8]) -> Result<Fingerprint> {
        if integrity_token.is_empty() {
            return Err(AttestError::InvalidPayload("integrity_token is required".into()));
        }

        let payload = self
            .decoder
            .decode(&self.package_name, integrity_token)
            .await
            .inspect_err(|e| warn!(error = %e, "decodeIntegrityToken failed"))?
            .ok_or_else(|| {
                warn!("Decoded token payload is empty");
                AttestError::from(VerdictFailure::EmptyPayload)
            })?;
        debug!("Token decoded");

        check_payload(&payload, &self.package_name, raw_challenge, Utc::now())?;

        info!("Play Integrity verification successful");
        Ok(Fingerprint::play())
    }
}

/// Apply every verdict and binding check to a decoded payload at `now`.
pub fn check_payload(
    payload: &TokenPayloadExternal,
    package_name: &str,
    raw_challenge: &[u8],
    now: DateTime<Utc>,
) -> Result<()> {
    let device = &payload.device_integrity.device_recognition_verdict;
    if !device.iter().any(|v| v == MEETS_DEVICE_INTEGRITY) {
        warn!(verdicts = ?device, "Device integrity check failed");
        return Err(VerdictFailure::DeviceIntegrityNotMet {
            verdicts: device.clone(),
        }
        .into());
    }
    debug!("Device integrity check passed");

    let licensing = &payload.account_details.app_licensing_verdict;
    if licensing != LICENSED {
        warn!(verdict = %licensing, "App licensing check failed");
        return Err(VerdictFailure::AppNotLicensed {
            verdict: licensing.clone(),
        }
        .into());
    }
    debug!("App licensing check passed");

    let recognition = &payload.app_integrity.app_recognition_verdict;
    if recognition != PLAY_RECOGNIZED {
        warn!(verdict = %recognition, "App recognition check failed");
        return Err(VerdictFailure::AppNotRecognized {
            verdict: recognition.clone(),
        }
        .into());
    }
    debug!("App recognition check passed");

    let details = &payload.request_details;
    if details.request_package_name != package_name {
        warn!(
            expected = %package_name,
            got = %details.request_package_name,
            "Package name mismatch"
        );
        return Err(VerdictFailure::PackageNameMismatch {
            expected: package_name.to_string(),
            got: details.request_package_name.clone(),
        }
        .into());
    }
    debug!("Package name check passed");

    check_timestamp(details.timestamp_millis, now)?;
    debug!("Timestamp check passed");

    let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(raw_challenge));
    let got = details.request_hash.as_deref().unwrap_or_default();
    if got.is_empty() || !bool::from(got.as_bytes().ct_eq(expected.as_bytes())) {
        warn!(present = !got.is_empty(), "Request hash does not match challenge");
        return Err(AttestError::RequestBindingFailed);
    }
    debug!("Request hash matches challenge");

    Ok(())
}

fn check_timestamp(timestamp_millis: Option<i64>, now: DateTime<Utc>) -> Result<()> {
    let ts = match timestamp_millis {
        Some(ts) if ts > 0 => ts,
        _ => {
            warn!("Request timestamp missing");
            return Err(VerdictFailure::TimestampMissing.into());
        }
    };

    let max_ms = MAX_TOKEN_AGE.as_millis() as i64;
    let age_ms = now.timestamp_millis() - ts;
    if age_ms > max_ms {
        warn!(age_ms, "Integrity token too old");
        return Err(VerdictFailure::TokenTooOld { age_ms }.into());
    }
    if -age_ms > max_ms {
        warn!(skew_ms = -age_ms, "Integrity token timestamp in the future");
        return Err(VerdictFailure::TokenFromFuture { skew_ms: -age_ms }.into());
    }
    Ok(())
}
