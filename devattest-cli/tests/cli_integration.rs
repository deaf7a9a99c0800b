//! CLI integration tests for devattest-cli.
//!
//! These tests run the actual binary and check outputs and exit codes.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use ciborium::Value;
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use p256::pkcs8::EncodePublicKey;
use predicates::prelude::*;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

const APP_ID: &str = "TEAM123456.com.example.worker";

/// Get a Command for the devattest binary.
fn devattest() -> Command {
    Command::cargo_bin("devattest").unwrap()
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

/// Files for an `assert` invocation signed by a fixed device key.
struct AssertionFixture {
    _temp: TempDir,
    assertion: std::path::PathBuf,
    public_key: std::path::PathBuf,
    client_data: std::path::PathBuf,
    challenge: String,
}

fn assertion_fixture(app_id_in_auth_data: &str) -> AssertionFixture {
    let temp = TempDir::new().unwrap();
    let key = SigningKey::from_bytes(&[42u8; 32].into()).unwrap();
    let raw_challenge = [7u8; 32];
    let challenge = URL_SAFE_NO_PAD.encode(raw_challenge);

    let client_data = format!(r#"{{"challenge":"{challenge}"}}"#).into_bytes();
    let mut auth_data = Sha256::digest(app_id_in_auth_data.as_bytes()).to_vec();
    auth_data.push(0x00);
    auth_data.extend_from_slice(&1u32.to_be_bytes());

    let mut hasher = Sha256::new();
    hasher.update(&auth_data);
    hasher.update(Sha256::digest(&client_data));
    let nonce = hasher.finalize();
    let sig: Signature = key.sign(&nonce);

    let value = Value::Map(vec![
        (
            Value::Text("signature".into()),
            Value::Bytes(sig.to_der().as_bytes().to_vec()),
        ),
        (
            Value::Text("authenticatorData".into()),
            Value::Bytes(auth_data),
        ),
    ]);
    let mut cbor = Vec::new();
    ciborium::into_writer(&value, &mut cbor).unwrap();

    let public_key_der = p256::PublicKey::from(key.verifying_key())
        .to_public_key_der()
        .unwrap();

    let assertion = temp.path().join("assertion.b64");
    let public_key = temp.path().join("key.der");
    let client_data_path = temp.path().join("client_data.json");
    fs::write(&assertion, STANDARD.encode(&cbor)).unwrap();
    fs::write(&public_key, public_key_der.as_bytes()).unwrap();
    fs::write(&client_data_path, &client_data).unwrap();

    AssertionFixture {
        _temp: temp,
        assertion,
        public_key,
        client_data: client_data_path,
        challenge,
    }
}

// ============================================================================
// Help and Version Tests
// ============================================================================

#[test]
fn test_help_displays_usage() {
    devattest()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Mobile device attestation tools"))
        .stdout(predicate::str::contains("inspect"))
        .stdout(predicate::str::contains("enroll"))
        .stdout(predicate::str::contains("assert"));
}

#[test]
fn test_version_displays_version() {
    devattest()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("devattest"));
}

#[test]
fn test_help_shows_exit_codes() {
    devattest()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Exit codes:"))
        .stdout(predicate::str::contains("65"))
        .stdout(predicate::str::contains("66"));
}

#[test]
fn test_enroll_help_shows_options() {
    devattest()
        .args(["enroll", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--challenge"))
        .stdout(predicate::str::contains("--root-ca"))
        .stdout(predicate::str::contains("--at"))
        .stdout(predicate::str::contains("--output"));
}

// ============================================================================
// Exit Code Tests
// ============================================================================

#[test]
fn test_missing_file_returns_input_error() {
    // Exit code 66 = EX_NOINPUT
    devattest()
        .args(["inspect", "nonexistent_attestation.cbor"])
        .assert()
        .code(66)
        .stderr(predicate::str::contains("Failed to read file"));
}

#[test]
fn test_inspect_garbage_returns_input_error() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("garbage.bin");
    fs::write(&file, [0xffu8, 0x00, 0x13, 0x37]).unwrap();

    devattest()
        .args(["inspect", path_str(&file)])
        .assert()
        .code(66)
        .stderr(predicate::str::contains("Failed to decode attestation object"));
}

#[test]
fn test_enroll_invalid_challenge_returns_input_error() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("attestation.bin");
    fs::write(&file, [0xa0u8]).unwrap();

    devattest()
        .args(["enroll", path_str(&file), "--challenge", "not base64!"])
        .assert()
        .code(66)
        .stderr(predicate::str::contains("Invalid --challenge"));
}

#[test]
fn test_enroll_malformed_attestation_fails_verification() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("attestation.bin");
    // Empty CBOR map: no fmt
    fs::write(&file, [0xa0u8]).unwrap();

    devattest()
        .args(["enroll", path_str(&file), "--challenge", "AAAA"])
        .assert()
        .code(65)
        .stderr(predicate::str::contains("Attestation verification failed"));
}

#[test]
fn test_conflicting_verbose_quiet_rejected() {
    devattest()
        .args(["--verbose", "--quiet", "inspect", "whatever.cbor"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

// ============================================================================
// Assertion Tests
// ============================================================================

#[test]
fn test_assert_valid_assertion() {
    let f = assertion_fixture(APP_ID);

    devattest()
        .args([
            "assert",
            path_str(&f.assertion),
            "--public-key",
            path_str(&f.public_key),
            "--client-data",
            path_str(&f.client_data),
            "--challenge",
            &f.challenge,
            "--app-id",
            APP_ID,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Assertion VALID"))
        .stdout(predicate::str::contains("Sign count:"));
}

#[test]
fn test_assert_quiet_prints_nothing() {
    let f = assertion_fixture(APP_ID);

    devattest()
        .args([
            "--quiet",
            "assert",
            path_str(&f.assertion),
            "--public-key",
            path_str(&f.public_key),
            "--client-data",
            path_str(&f.client_data),
            "--challenge",
            &f.challenge,
            "--app-id",
            APP_ID,
        ])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_assert_wrong_challenge_fails() {
    let f = assertion_fixture(APP_ID);

    devattest()
        .args([
            "assert",
            path_str(&f.assertion),
            "--public-key",
            path_str(&f.public_key),
            "--client-data",
            path_str(&f.client_data),
            "--challenge",
            &URL_SAFE_NO_PAD.encode([8u8; 32]),
            "--app-id",
            APP_ID,
        ])
        .assert()
        .code(65)
        .stderr(predicate::str::contains("Client data challenge"));
}

#[test]
fn test_assert_wrong_app_id_fails() {
    let f = assertion_fixture("OTHER.com.example.app");

    devattest()
        .args([
            "assert",
            path_str(&f.assertion),
            "--public-key",
            path_str(&f.public_key),
            "--client-data",
            path_str(&f.client_data),
            "--challenge",
            &f.challenge,
            "--app-id",
            APP_ID,
        ])
        .assert()
        .code(65)
        .stderr(predicate::str::contains("rpIdHash"));
}

#[test]
fn test_assert_wrong_key_id_fails() {
    let f = assertion_fixture(APP_ID);

    devattest()
        .args([
            "assert",
            path_str(&f.assertion),
            "--public-key",
            path_str(&f.public_key),
            "--client-data",
            path_str(&f.client_data),
            "--challenge",
            &f.challenge,
            "--app-id",
            APP_ID,
            "--key-id",
            &STANDARD.encode([0u8; 32]),
        ])
        .assert()
        .code(65)
        .stderr(predicate::str::contains("Key identifier"));
}
