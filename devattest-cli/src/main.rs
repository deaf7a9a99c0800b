//! Devattest CLI - offline App Attest inspection and verification.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use devattest_core::config::DEFAULT_APP_ID;
use tracing_subscriber::EnvFilter;

mod commands;
mod exit_codes;
mod utils;

use exit_codes::ExitCode;

const EXIT_CODES_HELP: &str = "\
Exit codes:
  0   Success
  1   General error
  65  Verification failed
  66  Input error (missing or undecodable input)";

#[derive(Parser)]
#[command(name = "devattest")]
#[command(author, version, about = "Mobile device attestation tools", long_about = None)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode an App Attest attestation object and print its contents
    Inspect {
        /// Attestation object (raw CBOR or base64)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Compare the rpIdHash against this app identifier
        #[arg(long)]
        app_id: Option<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Verify an attestation object and extract the device public key
    Enroll {
        /// Attestation object (raw CBOR or base64)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Raw challenge bytes, base64 or base64url
        #[arg(short, long)]
        challenge: String,

        /// App identifier (TEAMID.bundle)
        #[arg(long, default_value = DEFAULT_APP_ID)]
        app_id: String,

        /// Expected key id, base64 or base64url
        #[arg(long)]
        key_id: Option<String>,

        /// Root CA certificate (PEM); defaults to the Apple App Attestation root
        #[arg(long, value_name = "PEM")]
        root_ca: Option<PathBuf>,

        /// Validate certificates at this RFC 3339 time instead of now
        #[arg(long, value_name = "TIME")]
        at: Option<String>,

        /// Write the DER public key to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Verify an assertion with an enrolled public key
    Assert {
        /// Assertion object (raw CBOR or base64)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// DER SubjectPublicKeyInfo from `enroll --output`
        #[arg(long, value_name = "DER")]
        public_key: PathBuf,

        /// Client data JSON file
        #[arg(long, value_name = "JSON")]
        client_data: PathBuf,

        /// Raw challenge bytes, base64 or base64url
        #[arg(short, long)]
        challenge: String,

        /// App identifier (TEAMID.bundle)
        #[arg(long, default_value = DEFAULT_APP_ID)]
        app_id: String,

        /// Expected key id; derived from the public key when omitted
        #[arg(long)]
        key_id: Option<String>,
    },
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default = if verbose {
        "devattest_core=debug,devattest=debug"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    let quiet = cli.quiet;

    let result: Result<()> = match cli.command {
        Commands::Inspect { file, app_id, json } => {
            commands::inspect::execute(file, app_id, json, quiet).await
        }
        Commands::Enroll {
            file,
            challenge,
            app_id,
            key_id,
            root_ca,
            at,
            output,
        } => {
            commands::enroll::execute(
                commands::enroll::EnrollArgs {
                    file,
                    challenge,
                    app_id,
                    key_id,
                    root_ca,
                    at,
                    output,
                },
                quiet,
            )
            .await
        }
        Commands::Assert {
            file,
            public_key,
            client_data,
            challenge,
            app_id,
            key_id,
        } => {
            commands::assert::execute(
                commands::assert::AssertArgs {
                    file,
                    public_key,
                    client_data,
                    challenge,
                    app_id,
                    key_id,
                },
                quiet,
            )
            .await
        }
    };

    if let Err(err) = result {
        let exit = ExitCode::from_anyhow(&err);
        if let Some(message) = exit.message {
            eprintln!("{} {}", "Error:".red().bold(), message);
        }
        std::process::exit(exit.code);
    }
}
