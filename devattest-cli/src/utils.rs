//! Common utility functions shared across CLI commands.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use devattest_core::config::APPLE_APP_ATTESTATION_ROOT_CA;
use devattest_core::{decode_flex_b64, RootOfTrust};
use tracing::debug;

/// Read a file, with the path in the error context.
pub async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read file: {}", path.display()))
}

/// Read a binary object stored either raw or as base64 text.
pub async fn read_blob(path: &Path) -> Result<Vec<u8>> {
    let bytes = read_file(path).await?;
    Ok(decode_blob(bytes))
}

fn decode_blob(bytes: Vec<u8>) -> Vec<u8> {
    if let Ok(text) = std::str::from_utf8(&bytes) {
        if let Ok(decoded) = decode_flex_b64("file", text.trim()) {
            debug!(bytes = decoded.len(), "Decoded base64 input");
            return decoded;
        }
    }
    bytes
}

/// Decode a base64 or base64url command-line value.
pub fn decode_arg(name: &'static str, value: &str) -> Result<Vec<u8>> {
    decode_flex_b64(name, value.trim()).with_context(|| format!("Invalid --{name}"))
}

/// Parse `--at`, defaulting to now.
pub fn parse_time(at: Option<&str>) -> Result<DateTime<Utc>> {
    match at {
        Some(s) => Ok(DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("Invalid --at time: {s}"))?
            .with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}

/// Load the root CA from `path`, or the bundled Apple root.
pub async fn load_root(path: Option<&Path>) -> Result<RootOfTrust> {
    let root = match path {
        Some(path) => {
            let pem = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read root CA: {}", path.display()))?;
            RootOfTrust::from_pem(&pem)
        }
        None => RootOfTrust::from_pem(APPLE_APP_ATTESTATION_ROOT_CA),
    }
    .context("Failed to load root CA")?;
    debug!(subject = %root.subject(), "Loaded root CA");
    Ok(root)
}
