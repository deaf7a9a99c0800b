//! iOS App Attest verification.
//!
//! A device key moves through two states:
//!
//! - **NoKey + attestation**: the attestation object is verified against the
//!   Apple root and the challenge, and the credential public key is stored
//!   under its key identifier (enrollment).
//! - **KeyStored + assertion**: the assertion signature is verified with the
//!   stored key (assertion).
//!
//! An assertion for an unknown key is reported as
//! [`AttestError::KeyNotFoundForAssertion`] so the client can re-attest.
//! Every other combination is [`AttestError::InvalidAttestationState`].
//!
//! [`verify_attestation_object`] and [`verify_assertion`] are pure and usable
//! offline; [`AppAttestVerifier`] adds the key store.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::VerifyingKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use p256::PublicKey;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, info, instrument, warn};

use crate::codec::{
    extract_nonce, parse_signature, Assertion, AttestationObject, AuthenticatorData, CoseKey,
    APPLE_APPATTEST_FORMAT,
};
use crate::error::{AttestError, DecodeError, Result};
use crate::fingerprint::Fingerprint;
use crate::payload::{decode_flex_b64, AttestationPayload};
use crate::store::DeviceKeyStore;
use crate::x509::{validate_chain, RootOfTrust};

/// Key material extracted from a verified attestation object.
#[derive(Debug, Clone)]
pub struct EnrolledKey {
    /// `sha256(0x04 || X || Y)`
    pub key_id: [u8; 32],
    /// DER SubjectPublicKeyInfo.
    pub public_key_der: Vec<u8>,
    pub aaguid: Vec<u8>,
    pub sign_count: u32,
    pub receipt: Option<Vec<u8>>,
}

/// Details of a verified assertion.
#[derive(Debug, Clone, Copy)]
pub struct VerifiedAssertion {
    pub sign_count: u32,
    /// The submitted signature was high-S and was normalized.
    pub normalized_s: bool,
}

#[derive(Deserialize)]
struct ClientData {
    #[serde(default)]
    challenge: String,
}

fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    bool::from(a.ct_eq(b))
}

/// `sha256(authData || sha256(base64url(raw_challenge)))`
pub fn expected_nonce(auth_data: &[u8], raw_challenge: &[u8]) -> [u8; 32] {
    let challenge_hash = sha256(URL_SAFE_NO_PAD.encode(raw_challenge).as_bytes());
    let mut hasher = Sha256::new();
    hasher.update(auth_data);
    hasher.update(challenge_hash);
    hasher.finalize().into()
}

/// `sha256(sha256(authenticatorData || sha256(client_data)))`
pub fn assertion_digest(authenticator_data: &[u8], client_data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(authenticator_data);
    hasher.update(sha256(client_data));
    let nonce: [u8; 32] = hasher.finalize().into();
    sha256(&nonce)
}

/// Key identifier of a P-256 public key.
pub fn key_id_for(public_key: &PublicKey) -> [u8; 32] {
    sha256(public_key.to_encoded_point(false).as_bytes())
}

/// Key identifier of a DER SubjectPublicKeyInfo.
pub fn key_id_for_der(public_key_der: &[u8]) -> Result<[u8; 32]> {
    let public_key = PublicKey::from_public_key_der(public_key_der)
        .map_err(|e| DecodeError::PublicKey(e.to_string()))?;
    Ok(key_id_for(&public_key))
}

/// `sha256(app_id)`, the expected authenticator rpIdHash.
pub fn rp_id_hash(app_id: &str) -> [u8; 32] {
    sha256(app_id.as_bytes())
}

/// Verify an attestation object and extract the credential key.
///
/// Checks run in order: format, certificate chain, nonce, rpIdHash,
/// credential key, key identifier. `expected_key_id` is skipped when `None`.
pub fn verify_attestation_object(
    attestation: &[u8],
    raw_challenge: &[u8],
    app_id: &str,
    expected_key_id: Option<&[u8]>,
    root: &RootOfTrust,
    now: DateTime<Utc>,
) -> Result<EnrolledKey> {
    let object = AttestationObject::from_cbor(attestation)?;

    if object.fmt != APPLE_APPATTEST_FORMAT {
        warn!(fmt = %object.fmt, "Unexpected attestation format");
        return Err(AttestError::UnsupportedFormat(object.fmt));
    }

    let leaf = validate_chain(&object.x5c, root, now).inspect_err(|reason| {
        warn!(%reason, "Certificate chain validation failed");
    })?;
    debug!(chain_len = object.x5c.len(), "Certificate chain valid");

    let nonce = extract_nonce(&leaf)?;
    if !ct_eq(&nonce, &expected_nonce(&object.auth_data, raw_challenge)) {
        warn!("Nonce does not match authenticator data and challenge");
        return Err(AttestError::NonceMismatch);
    }
    debug!("Nonce matches challenge");

    let auth_data = object.authenticator_data()?;
    if !ct_eq(auth_data.rp_id_hash(), &rp_id_hash(app_id)) {
        warn!(app_id, "rpIdHash mismatch");
        return Err(AttestError::RpIdMismatch);
    }
    debug!("rpIdHash matches app id");

    let credential = auth_data.attested_credential()?;
    let cose_key = CoseKey::from_cbor(credential.public_key_cbor)?;
    let public_key = cose_key.to_public_key()?;
    let aaguid = credential.aaguid.to_vec();
    let sign_count = auth_data.sign_count();

    let key_id = sha256(&cose_key.uncompressed_point());
    if let Some(expected) = expected_key_id {
        if !ct_eq(&key_id, expected) {
            warn!("Key id does not match credential public key");
            return Err(AttestError::KeyIdMismatch);
        }
        debug!("Key id matches credential public key");
    }

    let public_key_der = public_key
        .to_public_key_der()
        .map_err(|e| DecodeError::PublicKey(e.to_string()))?
        .into_vec();

    Ok(EnrolledKey {
        key_id,
        public_key_der,
        aaguid,
        sign_count,
        receipt: object.receipt,
    })
}

/// Decode a stored DER key and confirm it hashes to `key_id`.
pub fn check_stored_key(public_key_der: &[u8], key_id: &[u8]) -> Result<PublicKey> {
    let public_key = PublicKey::from_public_key_der(public_key_der)
        .map_err(|e| DecodeError::PublicKey(e.to_string()))?;
    if !ct_eq(&key_id_for(&public_key), key_id) {
        warn!("Stored public key does not hash to key id");
        return Err(AttestError::KeyIdMismatch);
    }
    debug!("Stored public key matches key id");
    Ok(public_key)
}

/// Verify an assertion with a stored DER public key.
///
/// `client_data` is the decoded client data JSON; its `challenge` field must
/// decode to `raw_challenge`.
pub fn verify_assertion(
    assertion: &[u8],
    client_data: &[u8],
    raw_challenge: &[u8],
    public_key_der: &[u8],
    key_id: &[u8],
    app_id: &str,
) -> Result<VerifiedAssertion> {
    let public_key = check_stored_key(public_key_der, key_id)?;

    let parsed: ClientData = serde_json::from_slice(client_data)
        .map_err(|e| DecodeError::ClientData(e.to_string()))?;
    if parsed.challenge.is_empty() {
        return Err(DecodeError::ClientData("missing challenge".into()).into());
    }
    let client_challenge = decode_flex_b64("client_data.challenge", &parsed.challenge)?;
    if !ct_eq(&client_challenge, raw_challenge) {
        warn!("Client data challenge mismatch");
        return Err(AttestError::ChallengeMismatch);
    }
    debug!("Client data challenge matches");

    let assertion = Assertion::from_cbor(assertion)?;
    let signature = parse_signature(&assertion.signature).map_err(|e| {
        warn!(error = %e, "Assertion signature is not valid DER");
        AttestError::SignatureInvalid(e.to_string())
    })?;
    if signature.was_high_s {
        debug!("Signature S was high; normalized to low-S");
    }

    let auth_data = AuthenticatorData::parse(&assertion.authenticator_data)?;
    if !ct_eq(auth_data.rp_id_hash(), &rp_id_hash(app_id)) {
        warn!(app_id, "rpIdHash mismatch");
        return Err(AttestError::RpIdMismatch);
    }
    debug!("rpIdHash matches app id");

    let digest = assertion_digest(&assertion.authenticator_data, client_data);
    VerifyingKey::from(&public_key)
        .verify_prehash(&digest, &signature.signature)
        .map_err(|e| {
            warn!("ECDSA signature verification failed");
            AttestError::SignatureInvalid(e.to_string())
        })?;
    debug!("Assertion signature valid");

    Ok(VerifiedAssertion {
        sign_count: auth_data.sign_count(),
        normalized_s: signature.was_high_s,
    })
}

/// Stateful App Attest verifier.
pub struct AppAttestVerifier {
    keys: Arc<dyn DeviceKeyStore>,
    root: RootOfTrust,
    app_id: String,
}

impl AppAttestVerifier {
    pub fn new(keys: Arc<dyn DeviceKeyStore>, root: RootOfTrust, app_id: impl Into<String>) -> Self {
        Self {
            keys,
            root,
            app_id: app_id.into(),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Enroll or assert depending on the stored key and payload contents.
    #[instrument(level = "debug", skip_all, fields(app_id = %self.app_id))]
    pub async fn verify(
        &self,
        payload: &AttestationPayload,
        raw_challenge: &[u8],
    ) -> Result<Fingerprint> {
        let key_id_str = payload
            .key_id()
            .ok_or_else(|| AttestError::InvalidPayload("key_id is required".into()))?;
        let key_id = decode_flex_b64("key_id", key_id_str)?;

        match (payload.attestation(), payload.assertion()) {
            (Some(_), Some(_)) => {
                return Err(AttestError::InvalidPayload(
                    "attestation and assertion are mutually exclusive".into(),
                ))
            }
            (None, None) => {
                return Err(AttestError::InvalidPayload(
                    "one of attestation or assertion is required".into(),
                ))
            }
            _ => {}
        }

        let stored = self.keys.lookup(&key_id).await.inspect_err(|e| {
            warn!(error = %e, "Device key lookup failed");
        })?;

        match (stored, payload.attestation(), payload.assertion()) {
            (None, Some(attestation), None) => {
                debug!("No stored key; enrolling");
                self.enroll(key_id_str, &key_id, attestation, raw_challenge)
                    .await
            }
            (Some(public_key_der), None, Some(assertion)) => {
                debug!("Stored key found; verifying assertion");
                self.assert(
                    key_id_str,
                    &key_id,
                    &public_key_der,
                    assertion,
                    payload.client_data(),
                    raw_challenge,
                )
                .await
            }
            (None, None, Some(_)) => {
                warn!("Assertion for unknown key; re-attestation required");
                Err(AttestError::KeyNotFoundForAssertion)
            }
            _ => {
                warn!("Attestation submitted for an already enrolled key");
                Err(AttestError::InvalidAttestationState)
            }
        }
    }

    async fn enroll(
        &self,
        key_id_str: &str,
        key_id: &[u8],
        attestation_b64: &str,
        raw_challenge: &[u8],
    ) -> Result<Fingerprint> {
        let attestation = decode_flex_b64("attestation", attestation_b64)?;
        let enrolled = verify_attestation_object(
            &attestation,
            raw_challenge,
            &self.app_id,
            Some(key_id),
            &self.root,
            Utc::now(),
        )?;

        self.keys
            .save(&enrolled.key_id, &enrolled.public_key_der)
            .await
            .inspect_err(|e| warn!(error = %e, "Failed to save enrolled key"))?;

        info!(
            key_id = %hex::encode(&enrolled.key_id[..8]),
            "App Attest enrollment successful"
        );
        Ok(Fingerprint::app_attest(key_id_str))
    }

    async fn assert(
        &self,
        key_id_str: &str,
        key_id: &[u8],
        public_key_der: &[u8],
        assertion_b64: &str,
        client_data_b64: Option<&str>,
        raw_challenge: &[u8],
    ) -> Result<Fingerprint> {
        check_stored_key(public_key_der, key_id)?;

        let client_data_b64 = client_data_b64
            .ok_or_else(|| AttestError::InvalidPayload("client_data is required".into()))?;
        let client_data = decode_flex_b64("client_data", client_data_b64)?;
        let assertion = decode_flex_b64("assertion", assertion_b64)?;

        let verified = verify_assertion(
            &assertion,
            &client_data,
            raw_challenge,
            public_key_der,
            key_id,
            &self.app_id,
        )?;

        if let Err(e) = self.keys.save(key_id, public_key_der).await {
            warn!(error = %e, "Failed to refresh last_seen");
        }

        info!(
            key_id = %hex::encode(&key_id[..key_id.len().min(8)]),
            sign_count = verified.sign_count,
            "App Attest assertion successful"
        );
        Ok(Fingerprint::app_attest(key_id_str))
    }
}
