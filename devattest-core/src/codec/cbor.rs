//! CBOR structures: attestation objects, assertions, authenticator data and
//! COSE EC2 keys.
//!
//! ## Authenticator data layout
//!
//! ```text
//! rpIdHash(32) | flags(1) | signCount(4) | aaguid(16) | credIdLen(2, BE) | credId | COSE key
//! ```
//!
//! Assertions carry only the first 37 bytes.

use ciborium::Value as CborValue;
use p256::elliptic_curve::sec1::FromEncodedPoint;
use p256::{EncodedPoint, PublicKey};

use crate::error::DecodeError;

/// Attestation statement format produced by App Attest.
pub const APPLE_APPATTEST_FORMAT: &str = "apple-appattest";

const RP_ID_HASH_LEN: usize = 32;
const FLAGS_LEN: usize = 1;
const SIGN_COUNT_LEN: usize = 4;
const AAGUID_LEN: usize = 16;
const CRED_ID_LEN_LEN: usize = 2;

/// rpIdHash + flags + signCount.
pub const AUTH_DATA_HEADER_LEN: usize = RP_ID_HASH_LEN + FLAGS_LEN + SIGN_COUNT_LEN;

/// Header plus aaguid and credential id length.
pub const ATTESTED_HEADER_LEN: usize = AUTH_DATA_HEADER_LEN + AAGUID_LEN + CRED_ID_LEN_LEN;

// COSE key labels and values (RFC 9053)
const COSE_KTY: i128 = 1;
const COSE_ALG: i128 = 3;
const COSE_CRV: i128 = -1;
const COSE_X: i128 = -2;
const COSE_Y: i128 = -3;
const COSE_KTY_EC2: i128 = 2;
const COSE_ALG_ES256: i128 = -7;
const COSE_CRV_P256: i128 = 1;

// =============================================================================
// Attestation object
// =============================================================================

/// Decoded `{fmt, attStmt, authData}` attestation object.
#[derive(Debug, Clone)]
pub struct AttestationObject {
    pub fmt: String,
    /// `attStmt.x5c`, leaf first. Empty when absent.
    pub x5c: Vec<Vec<u8>>,
    pub receipt: Option<Vec<u8>>,
    pub auth_data: Vec<u8>,
}

impl AttestationObject {
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, DecodeError> {
        let map = decode_map(bytes)?;

        let fmt = text_field(&map, "fmt")?;
        let auth_data = bytes_field(&map, "authData")?;

        let (x5c, receipt) = match find(&map, "attStmt") {
            Some(CborValue::Map(stmt)) => {
                let x5c = match find(stmt, "x5c") {
                    Some(CborValue::Array(items)) => items
                        .iter()
                        .map(|item| {
                            item.as_bytes()
                                .cloned()
                                .ok_or(DecodeError::WrongType("attStmt.x5c"))
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                    Some(_) => return Err(DecodeError::WrongType("attStmt.x5c")),
                    None => Vec::new(),
                };
                let receipt = find(stmt, "receipt").and_then(|v| v.as_bytes()).cloned();
                (x5c, receipt)
            }
            Some(_) => return Err(DecodeError::WrongType("attStmt")),
            None => return Err(DecodeError::MissingField("attStmt")),
        };

        Ok(Self {
            fmt,
            x5c,
            receipt,
            auth_data,
        })
    }

    pub fn authenticator_data(&self) -> Result<AuthenticatorData<'_>, DecodeError> {
        AuthenticatorData::parse(&self.auth_data)
    }
}

// =============================================================================
// Assertion
// =============================================================================

/// Decoded `{authenticatorData, signature}` assertion object.
#[derive(Debug, Clone)]
pub struct Assertion {
    pub authenticator_data: Vec<u8>,
    /// DER-encoded ECDSA signature.
    pub signature: Vec<u8>,
}

impl Assertion {
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, DecodeError> {
        let map = decode_map(bytes)?;
        Ok(Self {
            authenticator_data: bytes_field(&map, "authenticatorData")?,
            signature: bytes_field(&map, "signature")?,
        })
    }
}

// =============================================================================
// Authenticator data
// =============================================================================

/// Borrowed view over authenticator data bytes.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatorData<'a> {
    raw: &'a [u8],
}

/// Attested credential section following the fixed header.
#[derive(Debug, Clone, Copy)]
pub struct AttestedCredential<'a> {
    pub aaguid: &'a [u8],
    pub credential_id: &'a [u8],
    /// Remaining bytes, starting with the CBOR COSE key.
    pub public_key_cbor: &'a [u8],
}

impl<'a> AuthenticatorData<'a> {
    pub fn parse(raw: &'a [u8]) -> Result<Self, DecodeError> {
        if raw.len() < AUTH_DATA_HEADER_LEN {
            return Err(DecodeError::AuthDataTooShort {
                len: raw.len(),
                min: AUTH_DATA_HEADER_LEN,
            });
        }
        Ok(Self { raw })
    }

    pub fn rp_id_hash(&self) -> &'a [u8] {
        &self.raw[..RP_ID_HASH_LEN]
    }

    pub fn flags(&self) -> u8 {
        self.raw[RP_ID_HASH_LEN]
    }

    pub fn sign_count(&self) -> u32 {
        let start = RP_ID_HASH_LEN + FLAGS_LEN;
        u32::from_be_bytes([
            self.raw[start],
            self.raw[start + 1],
            self.raw[start + 2],
            self.raw[start + 3],
        ])
    }

    pub fn attested_credential(&self) -> Result<AttestedCredential<'a>, DecodeError> {
        let raw = self.raw;
        if raw.len() < ATTESTED_HEADER_LEN {
            return Err(DecodeError::AuthDataTooShort {
                len: raw.len(),
                min: ATTESTED_HEADER_LEN,
            });
        }
        let aaguid = &raw[AUTH_DATA_HEADER_LEN..AUTH_DATA_HEADER_LEN + AAGUID_LEN];
        let len_at = AUTH_DATA_HEADER_LEN + AAGUID_LEN;
        let cred_id_len = u16::from_be_bytes([raw[len_at], raw[len_at + 1]]) as usize;

        let key_start = ATTESTED_HEADER_LEN + cred_id_len;
        if key_start > raw.len() {
            return Err(DecodeError::CredentialIdOverflow);
        }

        Ok(AttestedCredential {
            aaguid,
            credential_id: &raw[ATTESTED_HEADER_LEN..key_start],
            public_key_cbor: &raw[key_start..],
        })
    }
}

// =============================================================================
// COSE key
// =============================================================================

/// EC2 P-256 public key in COSE form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoseKey {
    pub x: [u8; 32],
    pub y: [u8; 32],
}

impl CoseKey {
    /// Decode a COSE key. Trailing bytes (extensions) are ignored.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, DecodeError> {
        let value: CborValue = ciborium::from_reader(bytes)
            .map_err(|e| DecodeError::CoseKey(format!("not CBOR: {e}")))?;
        let map = match value {
            CborValue::Map(m) => m,
            _ => return Err(DecodeError::CoseKey("not a map".into())),
        };

        match int_label(&map, COSE_KTY).and_then(as_int) {
            Some(COSE_KTY_EC2) => {}
            other => {
                return Err(DecodeError::CoseKey(format!(
                    "kty {other:?} is not EC2"
                )))
            }
        }
        if let Some(alg) = int_label(&map, COSE_ALG) {
            if as_int(alg) != Some(COSE_ALG_ES256) {
                return Err(DecodeError::CoseKey("alg is not ES256".into()));
            }
        }
        if int_label(&map, COSE_CRV).and_then(as_int) != Some(COSE_CRV_P256) {
            return Err(DecodeError::CoseKey("crv is not P-256".into()));
        }

        let x = coordinate(&map, COSE_X, "x")?;
        let y = coordinate(&map, COSE_Y, "y")?;
        Ok(Self { x, y })
    }

    /// SEC1 uncompressed point `0x04 || X || Y`.
    pub fn uncompressed_point(&self) -> [u8; 65] {
        let mut point = [0u8; 65];
        point[0] = 0x04;
        point[1..33].copy_from_slice(&self.x);
        point[33..].copy_from_slice(&self.y);
        point
    }

    /// Validate the point is on the curve.
    pub fn to_public_key(&self) -> Result<PublicKey, DecodeError> {
        let encoded =
            EncodedPoint::from_affine_coordinates(&self.x.into(), &self.y.into(), false);
        Option::from(PublicKey::from_encoded_point(&encoded))
            .ok_or_else(|| DecodeError::PublicKey("point is not on P-256".into()))
    }
}

fn coordinate(
    map: &[(CborValue, CborValue)],
    label: i128,
    name: &str,
) -> Result<[u8; 32], DecodeError> {
    let bytes = int_label(map, label)
        .and_then(|v| v.as_bytes())
        .ok_or_else(|| DecodeError::CoseKey(format!("missing {name} coordinate")))?;
    bytes.as_slice().try_into().map_err(|_| {
        DecodeError::CoseKey(format!("{name} coordinate is {} bytes", bytes.len()))
    })
}

// =============================================================================
// Helpers
// =============================================================================

fn decode_map(bytes: &[u8]) -> Result<Vec<(CborValue, CborValue)>, DecodeError> {
    let value: CborValue =
        ciborium::from_reader(bytes).map_err(|e| DecodeError::Cbor(e.to_string()))?;
    match value {
        CborValue::Map(m) => Ok(m),
        _ => Err(DecodeError::Cbor("top-level item is not a map".into())),
    }
}

fn find<'a>(map: &'a [(CborValue, CborValue)], key: &str) -> Option<&'a CborValue> {
    map.iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .map(|(_, v)| v)
}

fn int_label(map: &[(CborValue, CborValue)], label: i128) -> Option<&CborValue> {
    map.iter()
        .find(|(k, _)| as_int(k) == Some(label))
        .map(|(_, v)| v)
}

fn as_int(value: &CborValue) -> Option<i128> {
    value.as_integer().map(i128::from)
}

fn text_field(map: &[(CborValue, CborValue)], key: &'static str) -> Result<String, DecodeError> {
    match find(map, key) {
        Some(CborValue::Text(s)) => Ok(s.clone()),
        Some(_) => Err(DecodeError::WrongType(key)),
        None => Err(DecodeError::MissingField(key)),
    }
}

fn bytes_field(map: &[(CborValue, CborValue)], key: &'static str) -> Result<Vec<u8>, DecodeError> {
    match find(map, key) {
        Some(CborValue::Bytes(b)) => Ok(b.clone()),
        Some(_) => Err(DecodeError::WrongType(key)),
        None => Err(DecodeError::MissingField(key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: &CborValue) -> Vec<u8> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf).unwrap();
        buf
    }

    fn cose_key(x: &[u8], y: &[u8]) -> CborValue {
        CborValue::Map(vec![
            (CborValue::Integer(1.into()), CborValue::Integer(2.into())),
            (CborValue::Integer(3.into()), CborValue::Integer((-7).into())),
            (CborValue::Integer((-1).into()), CborValue::Integer(1.into())),
            (CborValue::Integer((-2).into()), CborValue::Bytes(x.to_vec())),
            (CborValue::Integer((-3).into()), CborValue::Bytes(y.to_vec())),
        ])
    }

    fn auth_data(cred_id: &[u8], key: &[u8]) -> Vec<u8> {
        let mut data = vec![0xAA; 32];
        data.push(0x41);
        data.extend_from_slice(&7u32.to_be_bytes());
        data.extend_from_slice(b"appattestdevelop");
        data.extend_from_slice(&(cred_id.len() as u16).to_be_bytes());
        data.extend_from_slice(cred_id);
        data.extend_from_slice(key);
        data
    }

    #[test]
    fn test_attestation_object_decode() {
        let obj = CborValue::Map(vec![
            (CborValue::Text("fmt".into()), CborValue::Text("apple-appattest".into())),
            (
                CborValue::Text("attStmt".into()),
                CborValue::Map(vec![
                    (
                        CborValue::Text("x5c".into()),
                        CborValue::Array(vec![
                            CborValue::Bytes(vec![1, 2, 3]),
                            CborValue::Bytes(vec![4, 5]),
                        ]),
                    ),
                    (CborValue::Text("receipt".into()), CborValue::Bytes(vec![9])),
                ]),
            ),
            (CborValue::Text("authData".into()), CborValue::Bytes(vec![0; 40])),
        ]);

        let decoded = AttestationObject::from_cbor(&encode(&obj)).unwrap();
        assert_eq!(decoded.fmt, APPLE_APPATTEST_FORMAT);
        assert_eq!(decoded.x5c, vec![vec![1, 2, 3], vec![4, 5]]);
        assert_eq!(decoded.receipt, Some(vec![9]));
        assert_eq!(decoded.auth_data.len(), 40);
    }

    #[test]
    fn test_attestation_object_missing_auth_data() {
        let obj = CborValue::Map(vec![
            (CborValue::Text("fmt".into()), CborValue::Text("none".into())),
            (CborValue::Text("attStmt".into()), CborValue::Map(vec![])),
        ]);
        let err = AttestationObject::from_cbor(&encode(&obj)).unwrap_err();
        assert!(matches!(err, DecodeError::MissingField("authData")));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(AttestationObject::from_cbor(&[0xff, 0x00, 0x13]).is_err());
        assert!(Assertion::from_cbor(&encode(&CborValue::Integer(3.into()))).is_err());
    }

    #[test]
    fn test_assertion_decode() {
        let obj = CborValue::Map(vec![
            (CborValue::Text("signature".into()), CborValue::Bytes(vec![0x30, 0x00])),
            (CborValue::Text("authenticatorData".into()), CborValue::Bytes(vec![1; 37])),
        ]);
        let assertion = Assertion::from_cbor(&encode(&obj)).unwrap();
        assert_eq!(assertion.signature, vec![0x30, 0x00]);
        assert_eq!(assertion.authenticator_data.len(), 37);
    }

    #[test]
    fn test_authenticator_data_fields() {
        let key = encode(&cose_key(&[1; 32], &[2; 32]));
        let data = auth_data(&[0x55; 32], &key);
        let parsed = AuthenticatorData::parse(&data).unwrap();

        assert_eq!(parsed.rp_id_hash(), &[0xAA; 32]);
        assert_eq!(parsed.flags(), 0x41);
        assert_eq!(parsed.sign_count(), 7);

        let cred = parsed.attested_credential().unwrap();
        assert_eq!(cred.aaguid, b"appattestdevelop");
        assert_eq!(cred.credential_id, &[0x55; 32]);
        assert_eq!(cred.public_key_cbor, key.as_slice());
    }

    #[test]
    fn test_authenticator_data_too_short() {
        assert!(matches!(
            AuthenticatorData::parse(&[0; 36]),
            Err(DecodeError::AuthDataTooShort { len: 36, min: 37 })
        ));

        let header_only = AuthenticatorData::parse(&[0; 37]).unwrap();
        assert!(header_only.attested_credential().is_err());
    }

    #[test]
    fn test_credential_id_overflow() {
        let mut data = auth_data(&[0x55; 4], &[]);
        let len_at = ATTESTED_HEADER_LEN - 2;
        data[len_at..len_at + 2].copy_from_slice(&500u16.to_be_bytes());
        let parsed = AuthenticatorData::parse(&data).unwrap();
        assert!(matches!(
            parsed.attested_credential(),
            Err(DecodeError::CredentialIdOverflow)
        ));
    }

    #[test]
    fn test_cose_key_decode() {
        let key = CoseKey::from_cbor(&encode(&cose_key(&[1; 32], &[2; 32]))).unwrap();
        assert_eq!(key.x, [1; 32]);
        let point = key.uncompressed_point();
        assert_eq!(point[0], 0x04);
        assert_eq!(&point[33..], &[2; 32]);
    }

    #[test]
    fn test_cose_key_short_coordinate() {
        let err = CoseKey::from_cbor(&encode(&cose_key(&[1; 31], &[2; 32]))).unwrap_err();
        assert!(err.to_string().contains("31 bytes"));
    }

    #[test]
    fn test_cose_key_wrong_curve() {
        let mut key = cose_key(&[1; 32], &[2; 32]);
        if let CborValue::Map(entries) = &mut key {
            entries[2].1 = CborValue::Integer(2.into());
        }
        assert!(CoseKey::from_cbor(&encode(&key)).is_err());
    }

    #[test]
    fn test_cose_key_off_curve_point() {
        let key = CoseKey { x: [1; 32], y: [2; 32] };
        assert!(key.to_public_key().is_err());
    }
}
