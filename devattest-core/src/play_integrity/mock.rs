//! Mock token decoder for testing.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{IntegrityTokenDecoder, TokenPayloadExternal};
use crate::error::{AttestError, Result};

enum Response {
    Payload(TokenPayloadExternal),
    Empty,
    Unavailable(String),
}

/// Decoder returning a fixed response regardless of the token.
/// WARNING: Do not use in production - accepts any token!
pub struct MockIntegrityDecoder {
    response: Response,
    calls: AtomicUsize,
}

impl MockIntegrityDecoder {
    pub fn returning(payload: TokenPayloadExternal) -> Self {
        Self::with(Response::Payload(payload))
    }

    /// Decoder whose response has no `tokenPayloadExternal`.
    pub fn empty() -> Self {
        Self::with(Response::Empty)
    }

    /// Decoder that always fails as if the service were unreachable.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::with(Response::Unavailable(reason.into()))
    }

    /// Number of decode calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn with(response: Response) -> Self {
        Self {
            response,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl IntegrityTokenDecoder for MockIntegrityDecoder {
    async fn decode(
        &self,
        _package_name: &str,
        _integrity_token: &str,
    ) -> Result<Option<TokenPayloadExternal>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.response {
            Response::Payload(payload) => Ok(Some(payload.clone())),
            Response::Empty => Ok(None),
            Response::Unavailable(reason) => Err(AttestError::UpstreamUnavailable(reason.clone())),
        }
    }
}
