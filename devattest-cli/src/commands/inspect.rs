//! Inspect command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use colored::Colorize;
use devattest_core::app_attest::key_id_for;
use devattest_core::codec::{extract_nonce, AttestationObject, CoseKey};
use devattest_core::rp_id_hash;
use devattest_core::x509::parse_certificates;
use serde::Serialize;
use tracing::{debug, info};

use crate::utils::read_blob;

const AAGUID_PRODUCTION: &[u8; 16] = b"appattest\0\0\0\0\0\0\0";
const AAGUID_DEVELOPMENT: &[u8; 16] = b"appattestdevelop";

/// Decoded view of an attestation object. Nothing here is verified.
#[derive(Debug, Serialize)]
struct Inspection {
    format: String,
    certificates: Vec<String>,
    nonce: Option<String>,
    rp_id_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    app_id_matches: Option<bool>,
    flags: u8,
    sign_count: u32,
    aaguid: String,
    environment: &'static str,
    credential_id: String,
    key_id: Option<String>,
    receipt_bytes: usize,
}

fn environment(aaguid: &[u8]) -> &'static str {
    if aaguid == AAGUID_PRODUCTION {
        "production"
    } else if aaguid == AAGUID_DEVELOPMENT {
        "development"
    } else {
        "unknown"
    }
}

fn inspect(bytes: &[u8], app_id: Option<&str>) -> Result<Inspection> {
    let object = AttestationObject::from_cbor(bytes).context("Failed to decode attestation object")?;
    let auth_data = object
        .authenticator_data()
        .context("Failed to decode authenticator data")?;
    let credential = auth_data
        .attested_credential()
        .context("Failed to decode attested credential")?;

    let certs = parse_certificates(&object.x5c).context("Failed to parse x5c")?;
    let certificates = certs
        .iter()
        .map(|c| c.tbs_certificate.subject.to_string())
        .collect();

    let nonce = match certs.first().map(extract_nonce) {
        Some(Ok(nonce)) => Some(hex::encode(nonce)),
        Some(Err(e)) => {
            debug!(error = %e, "No usable nonce extension");
            None
        }
        None => None,
    };

    // An undecodable key is reported as absent
    let key_id = CoseKey::from_cbor(credential.public_key_cbor)
        .and_then(|key| key.to_public_key())
        .map(|key| STANDARD.encode(key_id_for(&key)))
        .inspect_err(|e| debug!(error = %e, "Credential key not decodable"))
        .ok();

    Ok(Inspection {
        format: object.fmt.clone(),
        certificates,
        nonce,
        rp_id_hash: hex::encode(auth_data.rp_id_hash()),
        app_id_matches: app_id.map(|id| auth_data.rp_id_hash() == rp_id_hash(id)),
        flags: auth_data.flags(),
        sign_count: auth_data.sign_count(),
        aaguid: hex::encode(credential.aaguid),
        environment: environment(credential.aaguid),
        credential_id: STANDARD.encode(credential.credential_id),
        key_id,
        receipt_bytes: object.receipt.as_ref().map_or(0, Vec::len),
    })
}

/// Execute the inspect command.
pub async fn execute(file: PathBuf, app_id: Option<String>, json: bool, quiet: bool) -> Result<()> {
    let bytes = read_blob(&file).await?;
    info!(path = %file.display(), bytes = bytes.len(), "Read attestation object");

    let report = inspect(&bytes, app_id.as_deref())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    if quiet {
        return Ok(());
    }

    println!();
    println!("{}", "Attestation object".bold());
    println!("   {} {}", "Format:".dimmed(), report.format);
    println!("   {} {}", "Environment:".dimmed(), report.environment);
    println!("   {} {}", "AAGUID:".dimmed(), report.aaguid);
    println!("   {} {}", "Sign count:".dimmed(), report.sign_count);
    println!("   {} {:#04x}", "Flags:".dimmed(), report.flags);
    println!("   {} {}", "rpIdHash:".dimmed(), report.rp_id_hash);
    if let Some(matches) = report.app_id_matches {
        let verdict = if matches {
            "matches app id".green()
        } else {
            "does NOT match app id".red()
        };
        println!("   {} {}", "App id:".dimmed(), verdict);
    }
    println!("   {} {}", "Credential id:".dimmed(), report.credential_id);
    match &report.key_id {
        Some(key_id) => println!("   {} {}", "Key id:".dimmed(), key_id),
        None => println!("   {} {}", "Key id:".dimmed(), "undecodable key".yellow()),
    }
    match &report.nonce {
        Some(nonce) => println!("   {} {}", "Nonce:".dimmed(), nonce),
        None => println!("   {} {}", "Nonce:".dimmed(), "missing".yellow()),
    }
    println!("   {} {} bytes", "Receipt:".dimmed(), report.receipt_bytes);
    println!();
    println!("{}", "Certificate chain".bold());
    for (i, subject) in report.certificates.iter().enumerate() {
        println!("   {} {}", format!("[{i}]").as_str().dimmed(), subject);
    }
    Ok(())
}
