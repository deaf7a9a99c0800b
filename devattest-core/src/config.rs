//! Verifier configuration
//!
//! Loaded once from environment variables with defaults. Nothing here is
//! reloaded after a verifier has been constructed.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Apple App Attestation root CA bundled with the crate.
pub const APPLE_APP_ATTESTATION_ROOT_CA: &str =
    include_str!("../certs/apple_app_attestation_root_ca.pem");

/// Default App Attest application identifier (`TEAMID.bundle`).
pub const DEFAULT_APP_ID: &str = "U8G25F98S2.com.thepoofapp.worker";

/// Default Android package name.
pub const DEFAULT_PACKAGE_NAME: &str = "com.thepoofapp.worker";

/// Default lifetime of an issued challenge.
pub const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(5 * 60);

/// Default timeout for calls to the token decoding service.
pub const DEFAULT_PLAY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Attestation verifier configuration
#[derive(Debug, Clone)]
pub struct AttestConfig {
    /// App Attest application identifier, `TEAMID.bundle`
    pub app_id: String,
    /// Android package name the integrity token must be issued for
    pub package_name: String,
    /// Root of trust for App Attest certificate chains (PEM)
    pub root_ca_pem: String,
    /// Google service account JSON used for token decoding
    pub service_account_path: Option<PathBuf>,
    /// Request timeout for the token decoding service (default: 10s)
    pub play_timeout: Duration,
    /// Lifetime of issued challenges (default: 5 minutes)
    pub challenge_ttl: Duration,
    /// PostgreSQL URL for persistent stores
    pub database_url: Option<String>,
}

impl Default for AttestConfig {
    fn default() -> Self {
        Self {
            app_id: DEFAULT_APP_ID.to_string(),
            package_name: DEFAULT_PACKAGE_NAME.to_string(),
            root_ca_pem: APPLE_APP_ATTESTATION_ROOT_CA.to_string(),
            service_account_path: None,
            play_timeout: DEFAULT_PLAY_TIMEOUT,
            challenge_ttl: DEFAULT_CHALLENGE_TTL,
            database_url: None,
        }
    }
}

impl AttestConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let app_id = std::env::var("APP_ATTEST_APP_ID")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.app_id);

        let package_name = std::env::var("PLAY_INTEGRITY_PACKAGE_NAME")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.package_name);

        let root_ca_pem = match std::env::var("APP_ATTEST_ROOT_CA_PATH").ok() {
            Some(path) if !path.is_empty() => read_file(PathBuf::from(path))?,
            _ => defaults.root_ca_pem,
        };

        let service_account_path = std::env::var("PLAY_INTEGRITY_SERVICE_ACCOUNT_PATH")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let play_timeout = std::env::var("PLAY_INTEGRITY_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.play_timeout);

        let challenge_ttl = std::env::var("ATTESTATION_CHALLENGE_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.challenge_ttl);

        let database_url = std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());

        let config = Self {
            app_id,
            package_name,
            root_ca_pem,
            service_account_path,
            play_timeout,
            challenge_ttl,
            database_url,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that can never verify anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.app_id.split_once('.') {
            Some((team, bundle)) if !team.is_empty() && !bundle.is_empty() => {}
            _ => {
                return Err(ConfigError::Invalid(format!(
                    "app id {:?} is not of the form TEAMID.bundle",
                    self.app_id
                )))
            }
        }
        if self.package_name.is_empty() {
            return Err(ConfigError::Invalid("package name is empty".into()));
        }
        if !self.root_ca_pem.contains("BEGIN CERTIFICATE") {
            return Err(ConfigError::Invalid("root CA is not a PEM certificate".into()));
        }
        if self.challenge_ttl.is_zero() || self.play_timeout.is_zero() {
            return Err(ConfigError::Invalid("durations must be non-zero".into()));
        }
        Ok(())
    }

    /// Read the service account JSON, if configured.
    pub fn read_service_account(&self) -> Result<Option<String>, ConfigError> {
        self.service_account_path.clone().map(read_file).transpose()
    }
}

fn read_file(path: PathBuf) -> Result<String, ConfigError> {
    std::fs::read_to_string(&path).map_err(|source| ConfigError::Io { path, source })
}
