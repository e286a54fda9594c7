//! Error types for relying-party login processing.
//!
//! Each processing step owns an error enum. [`LoginError`] wraps them and
//! adds the message prefix callers use to tell the steps apart:
//!
//! - `Error redeeming code: ` for [`RedemptionError`]
//! - `Error validating token response: ` for [`TokenResponseError`] and
//!   [`IdentityTokenError`]
//! - `Error loading user info: ` for [`ProfileError`]

use crate::keys::KeySetError;

/// Errors raised by a [`Backchannel`](crate::backchannel::Backchannel) transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent or the response could not be read.
    #[error("Network error: {0}")]
    Network(String),

    /// The request did not complete within the configured timeout.
    #[error("Request timed out")]
    Timeout,

    /// The request could not be built.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Errors raised while exchanging an authorization code at the token endpoint.
#[derive(Debug, thiserror::Error)]
pub enum RedemptionError {
    /// The transport failed before a response was received.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The token endpoint returned an OAuth error document.
    #[error("{error} - {description}")]
    OAuth {
        /// The OAuth error code.
        error: String,
        /// The error description (empty when the server sent none).
        description: String,
    },

    /// The token endpoint returned a non-success status without an OAuth error body.
    #[error("HTTP {status} - {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body as received.
        body: String,
    },

    /// The response body is not a JSON token response.
    #[error("Failed to parse token response: {0}")]
    InvalidResponse(String),
}

impl RedemptionError {
    /// Creates an `OAuth` error from a token endpoint error document.
    #[must_use]
    pub fn oauth(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self::OAuth {
            error: error.into(),
            description: description.into(),
        }
    }
}

/// Structural defects in a token endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenResponseError {
    #[error("Access token is missing on token response.")]
    MissingAccessToken,

    #[error("Identity token is missing on token response.")]
    MissingIdentityToken,
}

/// Identity token validation failures.
///
/// Nonce absence and nonce mismatch share [`IdentityTokenError::InvalidNonce`]
/// so the two cases cannot be told apart.
#[derive(Debug, thiserror::Error)]
pub enum IdentityTokenError {
    /// The token is not a well-formed compact JWT.
    #[error("Identity token is malformed: {0}")]
    Malformed(String),

    /// The policy allows no signature algorithm at all.
    #[error("No valid signature algorithms are configured.")]
    NoValidAlgorithms,

    /// The header algorithm is outside the allow-list.
    #[error("Identity token uses invalid algorithm: {0}")]
    InvalidAlgorithm(String),

    /// No key in the key set verifies the signature.
    #[error("Error validating signature: {0}")]
    Signature(String),

    /// The key set could not be obtained.
    #[error("Error loading signing keys: {0}")]
    KeySet(#[from] KeySetError),

    #[error("Invalid issuer name. Expected {expected}, got {actual}.")]
    InvalidIssuer {
        /// The configured issuer.
        expected: String,
        /// The `iss` claim of the token.
        actual: String,
    },

    #[error("Invalid audience.")]
    InvalidAudience,

    #[error("Invalid authorized party.")]
    InvalidAuthorizedParty,

    #[error("Invalid nonce.")]
    InvalidNonce,

    #[error("at_hash is missing.")]
    AtHashMissing,

    #[error("Invalid access token hash.")]
    InvalidAtHash,

    /// A required claim is absent.
    #[error("{0} claim is missing.")]
    MissingClaim(&'static str),

    #[error("Identity token has expired.")]
    Expired,

    #[error("Identity token is issued in the future.")]
    IssuedInFuture,

    #[error("Identity token is not yet valid.")]
    NotYetValid,
}

impl IdentityTokenError {
    /// Creates an `InvalidIssuer` error.
    #[must_use]
    pub fn invalid_issuer(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidIssuer {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Returns `true` if the token never reached claim validation because it
    /// could not be parsed.
    #[must_use]
    pub fn is_parse_error(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }

    /// Returns `true` if the signature (or the keys needed to check it) failed.
    #[must_use]
    pub fn is_signature_error(&self) -> bool {
        matches!(self, Self::Signature(_) | Self::KeySet(_))
    }
}

/// Errors raised while loading claims from the user-info endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("No user info endpoint is configured.")]
    MissingEndpoint,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("Failed to parse user info response: {0}")]
    InvalidResponse(String),

    /// The user-info `sub` differs from the identity token subject.
    #[error("sub claim from user info endpoint does not match sub claim from identity token.")]
    SubjectMismatch,
}

fn describe(description: &Option<String>) -> String {
    description
        .as_deref()
        .map(|d| format!(" - {d}"))
        .unwrap_or_default()
}

/// Terminal error of one login attempt.
#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    /// The authorization server reported an error on the redirect.
    #[error("{error}{}", describe(description))]
    AuthorizationServer {
        /// The `error` parameter.
        error: String,
        /// The `error_description` parameter, if any.
        description: Option<String>,
    },

    /// The returned `state` does not match the issued one.
    #[error("Invalid state.")]
    StateMismatch,

    /// The response carries neither an error nor a code.
    #[error("Missing authorization code.")]
    MissingCode,

    #[error("Error redeeming code: {0}")]
    CodeRedemption(#[from] RedemptionError),

    #[error("Error validating token response: {0}")]
    TokenResponse(#[from] TokenResponseError),

    #[error("Error validating token response: {0}")]
    IdentityToken(#[from] IdentityTokenError),

    #[error("Error loading user info: {0}")]
    ProfileLoad(#[from] ProfileError),
}

impl LoginError {
    /// Creates an `AuthorizationServer` error from redirect parameters.
    #[must_use]
    pub fn authorization_server(error: impl Into<String>, description: Option<String>) -> Self {
        Self::AuthorizationServer {
            error: error.into(),
            description,
        }
    }

    /// Returns `true` if the failure may indicate a forged or replayed response.
    #[must_use]
    pub fn is_forgery_suspected(&self) -> bool {
        matches!(
            self,
            Self::StateMismatch | Self::IdentityToken(IdentityTokenError::InvalidNonce)
        )
    }

    /// Returns `true` if this is a token response or identity token validation error.
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Self::TokenResponse(_) | Self::IdentityToken(_))
    }

    /// Returns `true` if the failure originates from a remote party or the transport.
    #[must_use]
    pub fn is_external_error(&self) -> bool {
        matches!(
            self,
            Self::AuthorizationServer { .. } | Self::CodeRedemption(_) | Self::ProfileLoad(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_messages() {
        let err = LoginError::from(TokenResponseError::MissingAccessToken);
        assert_eq!(
            err.to_string(),
            "Error validating token response: Access token is missing on token response."
        );

        let err = LoginError::from(IdentityTokenError::InvalidNonce);
        assert_eq!(err.to_string(), "Error validating token response: Invalid nonce.");

        let err = LoginError::from(RedemptionError::oauth("invalid_grant", "code expired"));
        assert_eq!(
            err.to_string(),
            "Error redeeming code: invalid_grant - code expired"
        );

        let err = LoginError::from(RedemptionError::from(TransportError::Timeout));
        assert_eq!(err.to_string(), "Error redeeming code: Request timed out");
    }

    #[test]
    fn test_authorization_server_error_is_verbatim() {
        let err = LoginError::authorization_server("access_denied", Some("user said no".into()));
        assert_eq!(err.to_string(), "access_denied - user said no");

        let err = LoginError::authorization_server("login_required", None);
        assert_eq!(err.to_string(), "login_required");
    }

    #[test]
    fn test_identity_token_messages() {
        assert_eq!(
            IdentityTokenError::InvalidAlgorithm("HS256".into()).to_string(),
            "Identity token uses invalid algorithm: HS256"
        );
        assert_eq!(IdentityTokenError::AtHashMissing.to_string(), "at_hash is missing.");
        assert_eq!(
            IdentityTokenError::InvalidAtHash.to_string(),
            "Invalid access token hash."
        );
        assert_eq!(
            IdentityTokenError::MissingClaim("exp").to_string(),
            "exp claim is missing."
        );
    }

    #[test]
    fn test_error_predicates() {
        assert!(LoginError::StateMismatch.is_forgery_suspected());
        assert!(LoginError::from(IdentityTokenError::InvalidNonce).is_forgery_suspected());
        assert!(!LoginError::MissingCode.is_forgery_suspected());

        assert!(LoginError::from(TokenResponseError::MissingIdentityToken).is_validation_error());
        assert!(!LoginError::StateMismatch.is_validation_error());

        assert!(LoginError::from(ProfileError::Status(500)).is_external_error());
        assert!(LoginError::authorization_server("server_error", None).is_external_error());

        assert!(IdentityTokenError::Malformed("x".into()).is_parse_error());
        assert!(IdentityTokenError::Signature("x".into()).is_signature_error());
        assert!(!IdentityTokenError::Malformed("x".into()).is_signature_error());
    }
}
