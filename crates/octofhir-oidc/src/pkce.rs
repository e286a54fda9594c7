//! PKCE (Proof Key for Code Exchange) for the relying party.
//!
//! Implements the client half of RFC 7636 with the S256 method only. The
//! verifier stays in the [`LoginState`](crate::LoginState); the challenge goes
//! into the authorize request.
//!
//! # Example
//!
//! ```
//! use octofhir_oidc::pkce::{PkceChallenge, PkceVerifier};
//!
//! let verifier = PkceVerifier::generate();
//! let challenge = PkceChallenge::from_verifier(&verifier);
//!
//! assert_eq!(challenge.method(), "S256");
//! assert_eq!(challenge.as_str().len(), 43);
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised when adopting a caller-supplied verifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PkceError {
    /// Verifier length is outside the valid range (43-128 characters).
    #[error("Invalid verifier length: must be 43-128 characters, got {0}")]
    InvalidVerifierLength(usize),

    /// Verifier contains characters outside the unreserved set.
    #[error("Invalid verifier characters: must be URL-safe ([A-Za-z0-9-._~])")]
    InvalidVerifierCharacters,
}

// =============================================================================
// PKCE Verifier
// =============================================================================

/// PKCE code verifier.
///
/// A high-entropy random string over `[A-Za-z0-9-._~]`, 43 to 128 characters
/// long. Sent as `code_verifier` when the code is redeemed.
#[derive(Clone, PartialEq, Eq)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Adopts an existing verifier, e.g. one restored from a session store.
    ///
    /// # Errors
    ///
    /// Returns an error if the length is not between 43 and 128 characters or
    /// the string contains characters other than `[A-Za-z0-9-._~]`.
    pub fn new(verifier: impl Into<String>) -> Result<Self, PkceError> {
        let verifier = verifier.into();
        let len = verifier.len();

        if !(43..=128).contains(&len) {
            return Err(PkceError::InvalidVerifierLength(len));
        }

        if !verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
        {
            return Err(PkceError::InvalidVerifierCharacters);
        }

        Ok(Self(verifier))
    }

    /// Generates a verifier from 32 random bytes (43 base64url characters).
    #[must_use]
    pub fn generate() -> Self {
        Self(crate::state::random_token())
    }

    /// Returns the verifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Keeps the verifier out of logs.
impl std::fmt::Debug for PkceVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PkceVerifier(..)")
    }
}

impl AsRef<str> for PkceVerifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// PKCE Challenge
// =============================================================================

/// PKCE code challenge: `BASE64URL(SHA256(ASCII(code_verifier)))`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge(String);

impl PkceChallenge {
    /// The `code_challenge_method` value sent alongside the challenge.
    pub const METHOD: &'static str = "S256";

    /// Derives the S256 challenge for a verifier.
    #[must_use]
    pub fn from_verifier(verifier: &PkceVerifier) -> Self {
        let hash = Sha256::digest(verifier.0.as_bytes());
        Self(URL_SAFE_NO_PAD.encode(hash))
    }

    /// Returns the challenge as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the challenge method, always `S256`.
    #[must_use]
    pub fn method(&self) -> &'static str {
        Self::METHOD
    }
}

impl AsRef<str> for PkceChallenge {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifier_generation() {
        let verifier = PkceVerifier::generate();
        assert_eq!(verifier.as_str().len(), 43);
        assert!(
            verifier
                .as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert!(PkceVerifier::new(verifier.as_str()).is_ok());
    }

    #[test]
    fn test_verifier_generation_uniqueness() {
        let v1 = PkceVerifier::generate();
        let v2 = PkceVerifier::generate();
        assert_ne!(v1, v2);
    }

    #[test]
    fn test_verifier_length_bounds() {
        assert_eq!(
            PkceVerifier::new("a".repeat(42)).unwrap_err(),
            PkceError::InvalidVerifierLength(42)
        );
        assert!(PkceVerifier::new("a".repeat(43)).is_ok());
        assert!(PkceVerifier::new("a".repeat(128)).is_ok());
        assert_eq!(
            PkceVerifier::new("a".repeat(129)).unwrap_err(),
            PkceError::InvalidVerifierLength(129)
        );
    }

    #[test]
    fn test_verifier_characters() {
        let valid: String = "abcXYZ0129-._~".chars().cycle().take(50).collect();
        assert!(PkceVerifier::new(valid).is_ok());

        let invalid = format!("{}!", "a".repeat(50));
        assert_eq!(
            PkceVerifier::new(invalid).unwrap_err(),
            PkceError::InvalidVerifierCharacters
        );
    }

    #[test]
    fn test_verifier_debug_is_redacted() {
        let verifier = PkceVerifier::generate();
        let debug = format!("{:?}", verifier);
        assert!(!debug.contains(verifier.as_str()));
    }

    #[test]
    fn test_rfc7636_appendix_b_test_vector() {
        let verifier = PkceVerifier::new("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk").unwrap();
        let challenge = PkceChallenge::from_verifier(&verifier);

        assert_eq!(
            challenge.as_str(),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
        assert_eq!(challenge.method(), "S256");
    }
}
