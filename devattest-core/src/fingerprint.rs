//! Verification fingerprints.

use std::fmt;

use serde::Serialize;

/// Opaque identity returned by a successful verification.
///
/// `"play"` for Android; the request's `key_id` string, unchanged, for iOS.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub const PLAY: &'static str = "play";

    pub fn play() -> Self {
        Self(Self::PLAY.to_string())
    }

    pub fn app_attest(key_id: &str) -> Self {
        Self(key_id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
