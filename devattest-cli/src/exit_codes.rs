//! Exit codes following sysexits.h conventions.

use devattest_core::{AttestError, ChainValidationReason, DecodeError};

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Verification failed.
/// Maps to EX_DATAERR from sysexits.h.
pub const VERIFICATION_FAILED: i32 = 65;

/// Missing, unreadable or undecodable input.
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// Exit code with error context.
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    /// Classify an error by the types in its chain.
    ///
    /// A verification error wins over anything it wraps.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");

        let code = if err.chain().any(|e| e.is::<AttestError>()) {
            VERIFICATION_FAILED
        } else if err.chain().any(|e| {
            e.is::<std::io::Error>() || e.is::<DecodeError>() || e.is::<ChainValidationReason>()
        }) {
            INPUT_ERROR
        } else {
            GENERAL_ERROR
        };

        Self {
            code,
            message: Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_attest_error_is_verification_failure() {
        let err = anyhow::Error::new(AttestError::NonceMismatch).context("Attestation rejected");
        let exit = ExitCode::from_anyhow(&err);
        assert_eq!(exit.code, VERIFICATION_FAILED);
        assert!(exit.message.unwrap().contains("Nonce"));
    }

    #[test]
    fn test_wrapped_chain_reason_is_still_verification_failure() {
        let err = anyhow::Error::new(AttestError::CertificateInvalid(
            ChainValidationReason::EmptyChain,
        ));
        assert_eq!(ExitCode::from_anyhow(&err).code, VERIFICATION_FAILED);
    }

    #[test]
    fn test_io_error_is_input_error() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        let err = result.context("Failed to read file").unwrap_err();
        assert_eq!(ExitCode::from_anyhow(&err).code, INPUT_ERROR);
    }

    #[test]
    fn test_other_errors_are_general() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(ExitCode::from_anyhow(&err).code, GENERAL_ERROR);
    }
}
