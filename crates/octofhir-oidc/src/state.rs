//! Per-attempt anti-replay context.
//!
//! A [`LoginState`] is issued by [`OidcClient::prepare_login`](crate::OidcClient::prepare_login)
//! and handed back to [`OidcClient::process_response`](crate::OidcClient::process_response)
//! for the matching callback. The client never stores it.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use time::OffsetDateTime;

use crate::config::ClientOptions;
use crate::pkce::{PkceChallenge, PkceVerifier};

/// Anti-replay values for one login attempt.
#[derive(Clone)]
pub struct LoginState {
    state: String,
    nonce: String,
    code_verifier: Option<PkceVerifier>,
    code_challenge: Option<PkceChallenge>,
    redirect_uri: String,
    created_at: OffsetDateTime,
}

impl LoginState {
    /// Generates a fresh state for `options`.
    ///
    /// `state` and `nonce` carry 256 bits of randomness each. A PKCE pair is
    /// added when `options.use_pkce` is set.
    #[must_use]
    pub fn generate(options: &ClientOptions) -> Self {
        let mut login = Self::new(random_token(), random_token(), options.redirect_uri.clone());

        if options.use_pkce {
            login = login.with_code_verifier(PkceVerifier::generate());
        }

        login
    }

    /// Rebuilds a state from known values.
    ///
    /// Used when the values were kept by the caller across requests.
    #[must_use]
    pub fn new(
        state: impl Into<String>,
        nonce: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            state: state.into(),
            nonce: nonce.into(),
            code_verifier: None,
            code_challenge: None,
            redirect_uri: redirect_uri.into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Attaches a PKCE verifier and derives its challenge.
    #[must_use]
    pub fn with_code_verifier(mut self, verifier: PkceVerifier) -> Self {
        self.code_challenge = Some(PkceChallenge::from_verifier(&verifier));
        self.code_verifier = Some(verifier);
        self
    }

    /// Overrides the creation time, e.g. when restoring a persisted state.
    #[must_use]
    pub fn with_created_at(mut self, created_at: OffsetDateTime) -> Self {
        self.created_at = created_at;
        self
    }

    /// The `state` value sent in the authorize request.
    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    /// The `nonce` value sent in the authorize request.
    #[must_use]
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    #[must_use]
    pub fn code_verifier(&self) -> Option<&PkceVerifier> {
        self.code_verifier.as_ref()
    }

    /// The `code_challenge` value sent in the authorize request.
    #[must_use]
    pub fn code_challenge(&self) -> Option<&PkceChallenge> {
        self.code_challenge.as_ref()
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    #[must_use]
    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }
}

impl std::fmt::Debug for LoginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginState")
            .field("state", &self.state)
            .field("pkce", &self.code_verifier.is_some())
            .field("redirect_uri", &self.redirect_uri)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Returns 32 random bytes encoded as base64url without padding.
pub(crate) fn random_token() -> String {
    let mut rng = rand::thread_rng();
    // `gen` is a reserved keyword in Rust 2024
    let bytes: [u8; 32] = rng.r#gen();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compares two strings without short-circuiting on the first differing byte.
pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }

    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
