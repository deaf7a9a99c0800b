//! Binary decoders for untrusted attestation input.
//!
//! All decoders are pure functions over byte slices and never panic on
//! malformed input; every failure is a [`DecodeError`](crate::error::DecodeError).

pub mod asn1;
pub mod cbor;

pub use asn1::{extract_nonce, parse_signature, ParsedSignature, APPLE_NONCE_OID};
pub use cbor::{
    Assertion, AttestationObject, AttestedCredential, AuthenticatorData, CoseKey,
    APPLE_APPATTEST_FORMAT,
};
