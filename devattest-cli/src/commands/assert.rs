//! Assert command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use colored::Colorize;
use devattest_core::{key_id_for_der, verify_assertion};
use tracing::{debug, error, info};

use crate::utils::{decode_arg, read_blob, read_file};

pub struct AssertArgs {
    pub file: PathBuf,
    pub public_key: PathBuf,
    pub client_data: PathBuf,
    pub challenge: String,
    pub app_id: String,
    pub key_id: Option<String>,
}

/// Execute the assert command.
pub async fn execute(args: AssertArgs, quiet: bool) -> Result<()> {
    let assertion = read_blob(&args.file).await?;
    let public_key_der = read_file(&args.public_key).await?;
    let client_data = read_file(&args.client_data).await?;
    info!(
        assertion_bytes = assertion.len(),
        client_data_bytes = client_data.len(),
        "Read assertion inputs"
    );

    let raw_challenge = decode_arg("challenge", &args.challenge)?;
    let key_id = match args.key_id.as_deref() {
        Some(k) => decode_arg("key-id", k)?,
        None => {
            debug!("Deriving key id from public key");
            key_id_for_der(&public_key_der)
                .context("Failed to decode public key")?
                .to_vec()
        }
    };

    let verified = verify_assertion(
        &assertion,
        &client_data,
        &raw_challenge,
        &public_key_der,
        &key_id,
        &args.app_id,
    )
    .inspect_err(|e| error!(code = e.code(), error = %e, "Assertion rejected"))
    .context("Assertion verification failed")?;

    if !quiet {
        println!();
        println!("{}", "Assertion VALID".green().bold());
        println!("   {} {}", "App id:".dimmed(), args.app_id);
        println!("   {} {}", "Key id:".dimmed(), STANDARD.encode(&key_id));
        println!("   {} {}", "Sign count:".dimmed(), verified.sign_count);
        if verified.normalized_s {
            println!("   {} {}", "Signature:".dimmed(), "high-S, normalized".yellow());
        }
    }
    Ok(())
}
