//! Untrusted attestation payload submitted by the mobile client.
//!
//! Binary fields arrive as base64 in either the standard or URL-safe
//! alphabet, padded or not. [`decode_flex_b64`] accepts all four forms.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AttestError, DecodeError, Result};

/// Maximum length of an encoded Play Integrity token.
pub const MAX_INTEGRITY_TOKEN_LEN: usize = 8192;

/// Maximum length of an encoded App Attest attestation object.
pub const MAX_ATTESTATION_LEN: usize = 12288;

/// Maximum length of an encoded App Attest assertion.
pub const MAX_ASSERTION_LEN: usize = 8192;

/// Bounds on the encoded client data length.
pub const MIN_CLIENT_DATA_LEN: usize = 16;
pub const MAX_CLIENT_DATA_LEN: usize = 2048;

/// Request body carrying an attestation.
///
/// iOS clients send `key_id` plus exactly one of `attestation` (first use)
/// or `assertion` + `client_data` (later uses). Android clients send
/// `integrity_token`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttestationPayload {
    pub challenge_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attestation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity_token: Option<String>,
}

impl AttestationPayload {
    /// Check field presence and size bounds.
    ///
    /// Empty optional strings are treated as absent.
    pub fn validate(&self) -> Result<()> {
        if self.challenge_token.is_empty() {
            return Err(AttestError::InvalidPayload(
                "challenge_token is required".into(),
            ));
        }
        self.challenge_uuid()?;

        check_len("integrity_token", self.integrity_token(), 0, MAX_INTEGRITY_TOKEN_LEN)?;
        check_len("attestation", self.attestation(), 0, MAX_ATTESTATION_LEN)?;
        check_len("assertion", self.assertion(), 0, MAX_ASSERTION_LEN)?;
        check_len(
            "client_data",
            self.client_data(),
            MIN_CLIENT_DATA_LEN,
            MAX_CLIENT_DATA_LEN,
        )?;
        Ok(())
    }

    /// Parse `challenge_token` as a UUID.
    pub fn challenge_uuid(&self) -> Result<Uuid> {
        Uuid::parse_str(self.challenge_token.trim())
            .map_err(|e| AttestError::InvalidPayload(format!("challenge_token: {e}")))
    }

    pub fn key_id(&self) -> Option<&str> {
        non_empty(&self.key_id)
    }

    pub fn attestation(&self) -> Option<&str> {
        non_empty(&self.attestation)
    }

    pub fn assertion(&self) -> Option<&str> {
        non_empty(&self.assertion)
    }

    pub fn client_data(&self) -> Option<&str> {
        non_empty(&self.client_data)
    }

    pub fn integrity_token(&self) -> Option<&str> {
        non_empty(&self.integrity_token)
    }

    /// Short field summary for logs. Never includes field contents.
    pub fn summary(&self) -> String {
        format!(
            "integrity_token={} key_id={} attestation={} assertion={} client_data={}",
            len_of(&self.integrity_token),
            len_of(&self.key_id),
            len_of(&self.attestation),
            len_of(&self.assertion),
            len_of(&self.client_data),
        )
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

fn len_of(field: &Option<String>) -> usize {
    field.as_ref().map_or(0, String::len)
}

fn check_len(field: &str, value: Option<&str>, min: usize, max: usize) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    let len = value.chars().count();
    if len < min || len > max {
        return Err(AttestError::InvalidPayload(format!(
            "{field} length {len} outside {min}..={max}"
        )));
    }
    Ok(())
}

/// Decode base64 in either alphabet, with or without padding.
pub fn decode_flex_b64(field: &'static str, input: &str) -> std::result::Result<Vec<u8>, DecodeError> {
    let mut normalized: String = input
        .trim()
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();
    let rem = normalized.len() % 4;
    if rem != 0 {
        normalized.extend(std::iter::repeat('=').take(4 - rem));
    }
    STANDARD.decode(normalized).map_err(|e| DecodeError::Base64 {
        field,
        reason: e.to_string(),
    })
}
