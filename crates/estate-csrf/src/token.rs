//! Token generation.

use rand::{rngs::OsRng, RngCore};
use std::fmt;

/// Number of random bytes behind every token.
pub const TOKEN_BYTES: usize = 32;

/// Length of the hex-encoded token string.
pub const TOKEN_LEN: usize = TOKEN_BYTES * 2;

/// An opaque CSRF token.
///
/// The value is 32 bytes of OS randomness rendered as lowercase hex. It
/// carries no metadata and is never stored server-side; its only persistence
/// is the cookie pair issued alongside it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CsrfToken(String);

impl CsrfToken {
    /// Generate a fresh token from the operating system's CSPRNG.
    ///
    /// # Panics
    ///
    /// Panics if the OS random source is unavailable. There is no meaningful
    /// CSRF protection without it, so this is treated as fatal.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Wrap a value read from a cookie or header.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the token string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the token, returning the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for CsrfToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CsrfToken").field(&"***").finish()
    }
}

impl fmt::Display for CsrfToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CsrfToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
