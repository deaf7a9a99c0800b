//! Enroll command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use colored::Colorize;
use devattest_core::verify_attestation_object;
use tracing::{error, info};

use crate::utils::{decode_arg, load_root, parse_time, read_blob};

pub struct EnrollArgs {
    pub file: PathBuf,
    pub challenge: String,
    pub app_id: String,
    pub key_id: Option<String>,
    pub root_ca: Option<PathBuf>,
    pub at: Option<String>,
    pub output: Option<PathBuf>,
}

/// Execute the enroll command.
pub async fn execute(args: EnrollArgs, quiet: bool) -> Result<()> {
    let attestation = read_blob(&args.file).await?;
    info!(path = %args.file.display(), bytes = attestation.len(), "Read attestation object");

    let raw_challenge = decode_arg("challenge", &args.challenge)?;
    let expected_key_id = args
        .key_id
        .as_deref()
        .map(|k| decode_arg("key-id", k))
        .transpose()?;
    let root = load_root(args.root_ca.as_deref()).await?;
    let now = parse_time(args.at.as_deref())?;

    let enrolled = verify_attestation_object(
        &attestation,
        &raw_challenge,
        &args.app_id,
        expected_key_id.as_deref(),
        &root,
        now,
    )
    .inspect_err(|e| error!(code = e.code(), error = %e, "Attestation rejected"))
    .context("Attestation verification failed")?;

    if let Some(output) = &args.output {
        tokio::fs::write(output, &enrolled.public_key_der)
            .await
            .with_context(|| format!("Failed to write public key: {}", output.display()))?;
        info!(path = %output.display(), "Wrote DER public key");
    }

    if !quiet {
        println!();
        println!("{}", "Attestation VALID".green().bold());
        println!("   {} {}", "App id:".dimmed(), args.app_id);
        println!("   {} {}", "Key id:".dimmed(), STANDARD.encode(enrolled.key_id));
        println!("   {} {}", "Key id (hex):".dimmed(), hex::encode(enrolled.key_id));
        println!(
            "   {} {}",
            "Public key (DER):".dimmed(),
            STANDARD.encode(&enrolled.public_key_der)
        );
        println!("   {} {}", "Sign count:".dimmed(), enrolled.sign_count);
        if let Some(output) = &args.output {
            println!("   {} {}", "Written to:".dimmed(), output.display());
        }
    }
    Ok(())
}
