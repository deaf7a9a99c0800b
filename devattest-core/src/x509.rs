//! X.509 chain validation against a fixed root of trust.
//!
//! The attestation statement supplies `x5c = [leaf, intermediates...]`. The
//! chain is completed with the configured root and validated at a given
//! time:
//!
//! - each certificate's issuer matches its parent's subject
//! - every parent is a CA (Basic Constraints `cA = TRUE`)
//! - each signature verifies under the parent's key (ECDSA P-256 / P-384
//!   with SHA-256 / SHA-384)
//! - every certificate, root included, is within its validity period

use chrono::{DateTime, Utc};
use der::oid::{AssociatedOid, ObjectIdentifier};
use der::{Decode, DecodePem, Encode};
use ecdsa::signature::hazmat::PrehashVerifier;
use sha2::{Digest, Sha256, Sha384};
use x509_cert::ext::pkix::BasicConstraints;
use x509_cert::Certificate;

use crate::error::ChainValidationReason;

/// Maximum certificates accepted in `x5c`.
pub const MAX_CHAIN_DEPTH: usize = 10;

const ECDSA_WITH_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const ECDSA_WITH_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");

/// Trusted root certificate.
#[derive(Debug, Clone)]
pub struct RootOfTrust {
    cert: Certificate,
}

impl RootOfTrust {
    pub fn from_pem(pem: &str) -> Result<Self, ChainValidationReason> {
        let cert = Certificate::from_pem(pem.trim().as_bytes())
            .map_err(|e| ChainValidationReason::RootUnavailable(e.to_string()))?;
        Ok(Self { cert })
    }

    pub fn from_der(der: &[u8]) -> Result<Self, ChainValidationReason> {
        let cert = Certificate::from_der(der)
            .map_err(|e| ChainValidationReason::RootUnavailable(e.to_string()))?;
        Ok(Self { cert })
    }

    pub fn certificate(&self) -> &Certificate {
        &self.cert
    }

    pub fn subject(&self) -> String {
        self.cert.tbs_certificate.subject.to_string()
    }
}

/// Parse `x5c` and validate it up to `root` at `now`. Returns the leaf.
pub fn validate_chain(
    x5c: &[Vec<u8>],
    root: &RootOfTrust,
    now: DateTime<Utc>,
) -> Result<Certificate, ChainValidationReason> {
    if x5c.is_empty() {
        return Err(ChainValidationReason::EmptyChain);
    }
    if x5c.len() > MAX_CHAIN_DEPTH {
        return Err(ChainValidationReason::ChainTooDeep {
            depth: x5c.len(),
            max: MAX_CHAIN_DEPTH,
        });
    }

    let mut chain = parse_certificates(x5c)?;

    // Tolerate a statement that already ends with the root.
    if chain.len() > 1 && chain.last() == Some(&root.cert) {
        chain.pop();
    }
    chain.push(root.cert.clone());

    for i in 0..chain.len() - 1 {
        let cert = &chain[i];
        let parent = &chain[i + 1];

        if cert.tbs_certificate.issuer != parent.tbs_certificate.subject {
            return Err(ChainValidationReason::IssuerMismatch { index: i });
        }
        if !is_ca(parent) {
            return Err(ChainValidationReason::CaMissingCaFlag { index: i + 1 });
        }
        verify_signature(cert, parent, i)?;
    }

    let now_secs = now.timestamp();
    for (i, cert) in chain.iter().enumerate() {
        let validity = &cert.tbs_certificate.validity;
        let not_before = validity.not_before.to_unix_duration().as_secs() as i64;
        let not_after = validity.not_after.to_unix_duration().as_secs() as i64;

        if now_secs < not_before {
            return Err(ChainValidationReason::CertNotYetValid { index: i });
        }
        if now_secs > not_after {
            return Err(ChainValidationReason::CertExpired { index: i });
        }
    }

    Ok(chain.swap_remove(0))
}

/// Decode DER certificates, reporting the index of the first failure.
pub fn parse_certificates(x5c: &[Vec<u8>]) -> Result<Vec<Certificate>, ChainValidationReason> {
    x5c.iter()
        .enumerate()
        .map(|(index, der)| {
            Certificate::from_der(der).map_err(|e| ChainValidationReason::InvalidDer {
                index,
                reason: e.to_string(),
            })
        })
        .collect()
}

/// DER SubjectPublicKeyInfo of a certificate.
pub fn subject_public_key_der(cert: &Certificate) -> Result<Vec<u8>, der::Error> {
    cert.tbs_certificate.subject_public_key_info.to_der()
}

fn is_ca(cert: &Certificate) -> bool {
    cert.tbs_certificate
        .extensions
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|ext| ext.extn_id == BasicConstraints::OID)
        .and_then(|ext| BasicConstraints::from_der(ext.extn_value.as_bytes()).ok())
        .is_some_and(|bc| bc.ca)
}

fn verify_signature(
    cert: &Certificate,
    issuer: &Certificate,
    index: usize,
) -> Result<(), ChainValidationReason> {
    let tbs_der = cert
        .tbs_certificate
        .to_der()
        .map_err(|e| ChainValidationReason::InvalidDer {
            index,
            reason: e.to_string(),
        })?;

    let alg = cert.signature_algorithm.oid;
    let digest: Vec<u8> = if alg == ECDSA_WITH_SHA256 {
        Sha256::digest(&tbs_der).to_vec()
    } else if alg == ECDSA_WITH_SHA384 {
        Sha384::digest(&tbs_der).to_vec()
    } else {
        return Err(ChainValidationReason::UnsupportedAlgorithm {
            oid: alg.to_string(),
        });
    };

    let sig_bytes = cert.signature.raw_bytes();
    let issuer_key = issuer
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .as_bytes()
        .ok_or(ChainValidationReason::UnsupportedKey { index: index + 1 })?;

    let failed = |_: ecdsa::Error| ChainValidationReason::SignatureVerificationFailed { index };

    match issuer_key.len() {
        65 => {
            let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(issuer_key)
                .map_err(|_| ChainValidationReason::UnsupportedKey { index: index + 1 })?;
            let sig = p256::ecdsa::Signature::from_der(sig_bytes).map_err(failed)?;
            key.verify_prehash(&digest, &sig).map_err(failed)
        }
        97 => {
            let key = p384::ecdsa::VerifyingKey::from_sec1_bytes(issuer_key)
                .map_err(|_| ChainValidationReason::UnsupportedKey { index: index + 1 })?;
            let sig = p384::ecdsa::Signature::from_der(sig_bytes).map_err(failed)?;
            key.verify_prehash(&digest, &sig).map_err(failed)
        }
        _ => Err(ChainValidationReason::UnsupportedKey { index: index + 1 }),
    }
}
