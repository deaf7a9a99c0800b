//! Shared fixtures: an in-process App Attest CA, device keys and payload
//! builders.

#![allow(dead_code)]

use std::sync::Arc;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use ciborium::Value;
use openssl::asn1::{Asn1Integer, Asn1Object, Asn1OctetString, Asn1Time};
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rand::rand_bytes;
use openssl::x509::extension::BasicConstraints;
use openssl::x509::{X509Extension, X509Name, X509NameBuilder, X509};
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::EncodePublicKey;
use sha2::{Digest, Sha256};

use devattest_core::{
    AttestConfig, AttestationVerifier, IntegrityTokenDecoder, MemoryChallengeStore,
    MemoryDeviceKeyStore, RootOfTrust,
};

pub const APP_ID: &str = "TEAM123456.com.example.worker";
pub const PACKAGE_NAME: &str = "com.example.worker";

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

pub fn b64url(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

// =============================================================================
// Certificate authority
// =============================================================================

/// Two-level test CA: P-384 root and intermediate, like Apple's.
pub struct TestCa {
    root: X509,
    intermediate: X509,
    intermediate_key: PKey<Private>,
}

impl TestCa {
    pub fn new() -> Self {
        let root_key = ec_key(Nid::SECP384R1);
        let root_name = name("Test App Attestation Root CA");
        let root = build_cert(
            &root_name,
            &root_name,
            &root_key,
            &root_key,
            true,
            MessageDigest::sha384(),
            &[],
        );

        let intermediate_key = ec_key(Nid::SECP384R1);
        let intermediate = build_cert(
            &name("Test App Attestation CA 1"),
            root.subject_name(),
            &intermediate_key,
            &root_key,
            true,
            MessageDigest::sha384(),
            &[],
        );

        Self {
            root,
            intermediate,
            intermediate_key,
        }
    }

    pub fn root_pem(&self) -> String {
        String::from_utf8(self.root.to_pem().unwrap()).unwrap()
    }

    pub fn root(&self) -> RootOfTrust {
        RootOfTrust::from_pem(&self.root_pem()).unwrap()
    }

    pub fn root_der(&self) -> Vec<u8> {
        self.root.to_der().unwrap()
    }

    pub fn intermediate_der(&self) -> Vec<u8> {
        self.intermediate.to_der().unwrap()
    }

    /// Credential certificate for `device` carrying `nonce_ext` as the raw
    /// value of the nonce extension.
    pub fn credential_cert(&self, device: &TestDevice, nonce_ext: Option<&[u8]>) -> Vec<u8> {
        let subject = name(&hex::encode(device.key_id));
        let extensions: Vec<X509Extension> = nonce_ext
            .map(|value| {
                let oid = Asn1Object::from_str("1.2.840.113635.100.8.2").unwrap();
                let octets = Asn1OctetString::new_from_bytes(value).unwrap();
                X509Extension::new_from_der(&oid, false, &octets).unwrap()
            })
            .into_iter()
            .collect();

        build_cert(
            &subject,
            self.intermediate.subject_name(),
            &device.pkey,
            &self.intermediate_key,
            false,
            MessageDigest::sha256(),
            &extensions,
        )
        .to_der()
        .unwrap()
    }

    pub fn config(&self) -> AttestConfig {
        AttestConfig {
            app_id: APP_ID.to_string(),
            package_name: PACKAGE_NAME.to_string(),
            root_ca_pem: self.root_pem(),
            ..Default::default()
        }
    }
}

fn ec_key(nid: Nid) -> PKey<Private> {
    let group = EcGroup::from_curve_name(nid).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn name(cn: &str) -> X509Name {
    let mut builder = X509NameBuilder::new().unwrap();
    builder.append_entry_by_text("CN", cn).unwrap();
    builder.append_entry_by_text("O", "Test").unwrap();
    builder.build()
}

fn build_cert(
    subject: &openssl::x509::X509NameRef,
    issuer: &openssl::x509::X509NameRef,
    subject_key: &PKey<Private>,
    issuer_key: &PKey<Private>,
    ca: bool,
    digest: MessageDigest,
    extensions: &[X509Extension],
) -> X509 {
    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(subject).unwrap();
    builder.set_issuer_name(issuer).unwrap();
    builder.set_pubkey(subject_key).unwrap();

    let now = chrono::Utc::now().timestamp();
    builder
        .set_not_before(&Asn1Time::from_unix(now - 3600).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::from_unix(now + 365 * 86_400).unwrap())
        .unwrap();

    let mut serial = [0u8; 8];
    rand_bytes(&mut serial).unwrap();
    serial[0] &= 0x7f;
    let serial = Asn1Integer::from_bn(&BigNum::from_slice(&serial).unwrap()).unwrap();
    builder.set_serial_number(&serial).unwrap();

    let mut constraints = BasicConstraints::new();
    if ca {
        constraints.critical().ca();
    }
    builder.append_extension(constraints.build().unwrap()).unwrap();
    for ext in extensions {
        builder.append_extension2(ext).unwrap();
    }

    builder.sign(issuer_key, digest).unwrap();
    builder.build()
}

// =============================================================================
// Device
// =============================================================================

/// App Attest device key pair.
pub struct TestDevice {
    pub signing_key: SigningKey,
    pub key_id: [u8; 32],
    pkey: PKey<Private>,
}

impl TestDevice {
    pub fn new() -> Self {
        let pkey = ec_key(Nid::X9_62_PRIME256V1);
        let scalar = pkey.ec_key().unwrap().private_key().to_vec();
        let mut bytes = [0u8; 32];
        bytes[32 - scalar.len()..].copy_from_slice(&scalar);
        let signing_key = SigningKey::from_bytes(&bytes.into()).unwrap();

        let point = signing_key.verifying_key().to_encoded_point(false);
        let key_id = sha256(point.as_bytes());

        Self {
            signing_key,
            key_id,
            pkey,
        }
    }

    /// Key id as iOS sends it: standard, padded base64.
    pub fn key_id_b64(&self) -> String {
        STANDARD.encode(self.key_id)
    }

    pub fn public_key_der(&self) -> Vec<u8> {
        p256::PublicKey::from(self.signing_key.verifying_key())
            .to_public_key_der()
            .unwrap()
            .into_vec()
    }

    pub fn cose_key(&self) -> Vec<u8> {
        let point = self.signing_key.verifying_key().to_encoded_point(false);
        let value = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer(2.into())),
            (Value::Integer(3.into()), Value::Integer((-7).into())),
            (Value::Integer((-1).into()), Value::Integer(1.into())),
            (
                Value::Integer((-2).into()),
                Value::Bytes(point.x().unwrap().to_vec()),
            ),
            (
                Value::Integer((-3).into()),
                Value::Bytes(point.y().unwrap().to_vec()),
            ),
        ]);
        to_cbor(&value)
    }
}

// =============================================================================
// Attestation and assertion builders
// =============================================================================

pub fn to_cbor(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).unwrap();
    buf
}

/// Authenticator data with an attested credential for `device`.
pub fn attestation_auth_data(device: &TestDevice, app_id: &str) -> Vec<u8> {
    let mut auth_data = sha256(app_id.as_bytes()).to_vec();
    auth_data.push(0x40);
    auth_data.extend_from_slice(&0u32.to_be_bytes());
    let mut aaguid = [0u8; 16];
    aaguid[..9].copy_from_slice(b"appattest");
    auth_data.extend_from_slice(&aaguid);
    auth_data.extend_from_slice(&(device.key_id.len() as u16).to_be_bytes());
    auth_data.extend_from_slice(&device.key_id);
    auth_data.extend_from_slice(&device.cose_key());
    auth_data
}

/// `sha256(authData || sha256(base64url(raw_challenge)))`
pub fn attestation_nonce(auth_data: &[u8], raw_challenge: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(auth_data);
    hasher.update(sha256(b64url(raw_challenge).as_bytes()));
    hasher.finalize().into()
}

/// DER value of the nonce extension.
pub fn nonce_extension(nonce: &[u8]) -> Vec<u8> {
    let mut value = vec![0x30, nonce.len() as u8 + 4, 0xa1, nonce.len() as u8 + 2, 0x04];
    value.push(nonce.len() as u8);
    value.extend_from_slice(nonce);
    value
}

pub fn encode_attestation(fmt: &str, x5c: Vec<Vec<u8>>, auth_data: &[u8]) -> Vec<u8> {
    let value = Value::Map(vec![
        (Value::Text("fmt".into()), Value::Text(fmt.into())),
        (
            Value::Text("attStmt".into()),
            Value::Map(vec![
                (
                    Value::Text("x5c".into()),
                    Value::Array(x5c.into_iter().map(Value::Bytes).collect()),
                ),
                (Value::Text("receipt".into()), Value::Bytes(vec![0xAA; 16])),
            ]),
        ),
        (Value::Text("authData".into()), Value::Bytes(auth_data.to_vec())),
    ]);
    to_cbor(&value)
}

/// Fully valid attestation object for `device` bound to `raw_challenge`.
pub fn build_attestation(
    ca: &TestCa,
    device: &TestDevice,
    raw_challenge: &[u8],
    app_id: &str,
) -> Vec<u8> {
    let auth_data = attestation_auth_data(device, app_id);
    let nonce = attestation_nonce(&auth_data, raw_challenge);
    let leaf = ca.credential_cert(device, Some(&nonce_extension(&nonce)));
    encode_attestation(
        "apple-appattest",
        vec![leaf, ca.intermediate_der()],
        &auth_data,
    )
}

pub fn client_data_json(raw_challenge: &[u8]) -> Vec<u8> {
    serde_json::json!({ "challenge": b64url(raw_challenge) })
        .to_string()
        .into_bytes()
}

pub fn assertion_auth_data(app_id: &str, counter: u32) -> Vec<u8> {
    let mut auth_data = sha256(app_id.as_bytes()).to_vec();
    auth_data.push(0x00);
    auth_data.extend_from_slice(&counter.to_be_bytes());
    auth_data
}

/// Low-S signature over `sha256(authData || sha256(client_data))`.
pub fn sign_assertion(device: &TestDevice, auth_data: &[u8], client_data: &[u8]) -> Signature {
    let mut hasher = Sha256::new();
    hasher.update(auth_data);
    hasher.update(sha256(client_data));
    let nonce: [u8; 32] = hasher.finalize().into();
    let sig: Signature = device.signing_key.sign(&nonce);
    sig.normalize_s().unwrap_or(sig)
}

pub fn encode_assertion(auth_data: &[u8], signature_der: &[u8]) -> Vec<u8> {
    let value = Value::Map(vec![
        (
            Value::Text("signature".into()),
            Value::Bytes(signature_der.to_vec()),
        ),
        (
            Value::Text("authenticatorData".into()),
            Value::Bytes(auth_data.to_vec()),
        ),
    ]);
    to_cbor(&value)
}

pub fn build_assertion(device: &TestDevice, client_data: &[u8], app_id: &str, counter: u32) -> Vec<u8> {
    let auth_data = assertion_auth_data(app_id, counter);
    let sig = sign_assertion(device, &auth_data, client_data);
    encode_assertion(&auth_data, sig.to_der().as_bytes())
}

// =============================================================================
// Verifier harness
// =============================================================================

pub struct Harness {
    pub verifier: AttestationVerifier,
    pub challenges: Arc<MemoryChallengeStore>,
    pub keys: Arc<MemoryDeviceKeyStore>,
}

impl Harness {
    pub fn new(ca: &TestCa, decoder: Option<Arc<dyn IntegrityTokenDecoder>>) -> Self {
        let challenges = Arc::new(MemoryChallengeStore::new());
        let keys = Arc::new(MemoryDeviceKeyStore::new());
        let verifier =
            AttestationVerifier::new(&ca.config(), challenges.clone(), keys.clone(), decoder)
                .unwrap();
        Self {
            verifier,
            challenges,
            keys,
        }
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("devattest_core=debug")
        .with_test_writer()
        .try_init();
}
