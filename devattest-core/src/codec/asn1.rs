//! ASN.1 decoding: the App Attest nonce extension and ECDSA `(r, s)` pairs.

use der::asn1::{ObjectIdentifier, OctetString};
use der::{Decode, Sequence};
use p256::ecdsa::Signature;
use x509_cert::Certificate;

use crate::error::{AttestError, DecodeError};

/// Certificate extension carrying the attestation nonce.
pub const APPLE_NONCE_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113635.100.8.2");

/// Expected nonce length (SHA-256 output).
pub const NONCE_LEN: usize = 32;

/// `SEQUENCE { [1] EXPLICIT OCTET STRING }`
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct AppleNonceExtension {
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", optional = "true")]
    nonce: Option<OctetString>,
}

/// Extract the 32-byte nonce from the credential certificate.
///
/// A missing extension, an undecodable value or a missing `[1]` field is
/// [`AttestError::NonceExtensionMissing`]; a nonce of any other length is
/// [`AttestError::NonceLengthInvalid`].
pub fn extract_nonce(cert: &Certificate) -> Result<[u8; NONCE_LEN], AttestError> {
    let ext = cert
        .tbs_certificate
        .extensions
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|ext| ext.extn_id == APPLE_NONCE_OID)
        .ok_or(AttestError::NonceExtensionMissing)?;

    let parsed = AppleNonceExtension::from_der(ext.extn_value.as_bytes()).map_err(|e| {
        tracing::debug!(error = %e, "Nonce extension is not well-formed");
        AttestError::NonceExtensionMissing
    })?;
    let nonce = parsed.nonce.ok_or(AttestError::NonceExtensionMissing)?;

    nonce
        .as_bytes()
        .try_into()
        .map_err(|_| AttestError::NonceLengthInvalid {
            got: nonce.as_bytes().len(),
        })
}

/// DER ECDSA signature normalized to low-S form.
#[derive(Debug, Clone, Copy)]
pub struct ParsedSignature {
    pub signature: Signature,
    /// The encoded signature had `s > n/2`.
    pub was_high_s: bool,
}

/// Parse a DER `SEQUENCE { r INTEGER, s INTEGER }` P-256 signature.
///
/// High-S signatures are accepted and rewritten as `(r, n - s)`.
pub fn parse_signature(der_bytes: &[u8]) -> Result<ParsedSignature, DecodeError> {
    let sig = Signature::from_der(der_bytes).map_err(|e| DecodeError::Asn1(e.to_string()))?;
    Ok(match sig.normalize_s() {
        Some(low) => ParsedSignature {
            signature: low,
            was_high_s: true,
        },
        None => ParsedSignature {
            signature: sig,
            was_high_s: false,
        },
    })
}
