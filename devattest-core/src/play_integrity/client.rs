//! Google Play Integrity API client.
//!
//! Tokens are decoded with `POST v1/{package}:decodeIntegrityToken`,
//! authorized by an OAuth2 access token obtained through the service-account
//! JWT-bearer grant.
//!
//! ## Features
//!
//! - HTTPS-only connections with a request timeout
//! - No retries: every failure surfaces as `UpstreamUnavailable`
//! - Service account private key zeroized on drop

use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{DecodeIntegrityTokenResponse, IntegrityTokenDecoder, TokenPayloadExternal};
use crate::config::ConfigError;
use crate::error::{AttestError, Result};

/// Default Play Integrity API endpoint.
const DEFAULT_API_BASE: &str = "https://playintegrity.googleapis.com";

/// Default OAuth2 token endpoint.
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// OAuth2 scope for the Play Integrity API.
const PLAY_INTEGRITY_SCOPE: &str = "https://www.googleapis.com/auth/playintegrity";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime of the signed assertion sent to the token endpoint.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Fields of a Google service account JSON key used by this client.
#[derive(Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ServiceAccountKey {
    pub client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> std::result::Result<Self, ConfigError> {
        let key: Self = serde_json::from_str(json)
            .map_err(|e| ConfigError::Invalid(format!("service account JSON: {e}")))?;
        if !key.private_key.contains("PRIVATE KEY") {
            return Err(ConfigError::Invalid(
                "service account private_key is not a PEM key".into(),
            ));
        }
        Ok(key)
    }
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key", &"[REDACTED]")
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DecodeRequest<'a> {
    integrity_token: &'a str,
}

/// Play Integrity token decoder backed by Google's API.
pub struct PlayIntegrityClient {
    http: Client,
    key: ServiceAccountKey,
    api_base: String,
}

impl PlayIntegrityClient {
    /// Create a client from service account JSON.
    #[instrument(level = "debug", skip_all, fields(timeout_ms = timeout.as_millis() as u64))]
    pub fn new(service_account_json: &str, timeout: Duration) -> std::result::Result<Self, ConfigError> {
        let key = ServiceAccountKey::from_json(service_account_json)?;

        let http = Client::builder()
            .timeout(timeout)
            .https_only(true)
            .min_tls_version(reqwest::tls::Version::TLS_1_2)
            .build()
            .map_err(|e| {
                warn!(error = %e, "Failed to create HTTP client");
                ConfigError::Invalid(format!("Failed to create HTTP client: {e}"))
            })?;

        info!(client_email = %key.client_email, "Play Integrity client created");
        Ok(Self {
            http,
            key,
            api_base: DEFAULT_API_BASE.to_string(),
        })
    }

    /// Sign the JWT-bearer assertion for the token endpoint.
    fn signed_assertion(&self) -> Result<String> {
        let iat = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: PLAY_INTEGRITY_SCOPE,
            aud: &self.key.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        let encoding_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| AttestError::UpstreamUnavailable(format!("service account key: {e}")))?;
        encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
            .map_err(|e| AttestError::UpstreamUnavailable(format!("sign assertion: {e}")))
    }

    /// Exchange a signed assertion for an access token.
    async fn access_token(&self) -> Result<String> {
        let assertion = self.signed_assertion()?;
        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| upstream("token request", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttestError::UpstreamUnavailable(format!(
                "token endpoint returned status: {status}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| upstream("token response", e))?;
        Ok(token.access_token)
    }
}

fn upstream(stage: &str, e: reqwest::Error) -> AttestError {
    warn!(stage, error = %e, timeout = e.is_timeout(), "Play Integrity request failed");
    AttestError::UpstreamUnavailable(format!("{stage}: {e}"))
}

#[async_trait]
impl IntegrityTokenDecoder for PlayIntegrityClient {
    #[instrument(level = "debug", skip_all, fields(package = %package_name))]
    async fn decode(
        &self,
        package_name: &str,
        integrity_token: &str,
    ) -> Result<Option<TokenPayloadExternal>> {
        let start = Instant::now();
        let access_token = self.access_token().await?;

        let url = format!("{}/v1/{}:decodeIntegrityToken", self.api_base, package_name);
        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&DecodeRequest { integrity_token })
            .send()
            .await
            .map_err(|e| upstream("decodeIntegrityToken", e))?;

        let status = response.status();
        debug!(status = %status, "Received HTTP response");
        if !status.is_success() {
            warn!(
                status = %status,
                latency_ms = start.elapsed().as_millis() as u64,
                "decodeIntegrityToken returned an error status"
            );
            return Err(AttestError::UpstreamUnavailable(format!(
                "decodeIntegrityToken returned status: {status}"
            )));
        }

        let body: DecodeIntegrityTokenResponse = response
            .json()
            .await
            .map_err(|e| upstream("decodeIntegrityToken response", e))?;

        debug!(
            latency_ms = start.elapsed().as_millis() as u64,
            "Integrity token decoded"
        );
        Ok(body.token_payload_external)
    }
}
