//! Signing key sets.
//!
//! The client verifies identity tokens against a [`KeySet`] obtained from a
//! [`KeySetProvider`] on every login. Fetching and rotating JWKS documents is
//! left to provider implementations; [`StaticKeySet`] serves a fixed set.
//!
//! Keys with `"use": "enc"` are never used for signature verification.

use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, JwkSet, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};

/// Errors raised while building or obtaining a key set.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KeySetError {
    /// The JWKS document could not be parsed.
    #[error("Failed to parse JWKS: {0}")]
    ParseError(String),

    /// A key could not be converted to a verification key.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The provider could not supply a key set.
    #[error("Key set unavailable: {0}")]
    Unavailable(String),
}

/// A key usable for signature verification.
#[derive(Clone)]
pub struct VerificationKey {
    kid: Option<String>,
    algorithm: Option<Algorithm>,
    key: DecodingKey,
}

impl VerificationKey {
    /// Wraps a decoding key without a key id or algorithm restriction.
    #[must_use]
    pub fn new(key: DecodingKey) -> Self {
        Self {
            kid: None,
            algorithm: None,
            key,
        }
    }

    /// Converts a JWK.
    ///
    /// # Errors
    ///
    /// Returns `KeySetError::InvalidKey` if the key parameters are unusable.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, KeySetError> {
        let key = DecodingKey::from_jwk(jwk).map_err(|e| {
            KeySetError::InvalidKey(format!(
                "{}: {}",
                jwk.common.key_id.as_deref().unwrap_or("<no kid>"),
                e
            ))
        })?;

        Ok(Self {
            kid: jwk.common.key_id.clone(),
            algorithm: jwk_algorithm(jwk),
            key,
        })
    }

    /// Sets the key id.
    #[must_use]
    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    /// Restricts the key to one algorithm.
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    #[must_use]
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    #[must_use]
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }

    fn accepts(&self, kid: Option<&str>, algorithm: Algorithm) -> bool {
        let kid_matches = match (kid, self.kid.as_deref()) {
            (Some(wanted), Some(own)) => wanted == own,
            _ => true,
        };

        kid_matches && self.algorithm.is_none_or(|own| own == algorithm)
    }
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// A set of verification keys.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: Vec<VerificationKey>,
}

impl KeySet {
    /// Creates an empty key set. Every signature check against it fails.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a key set from a JWKS.
    ///
    /// Encryption keys are skipped. Keys that cannot be converted are skipped
    /// with a warning.
    #[must_use]
    pub fn from_jwks(jwks: &JwkSet) -> Self {
        let keys = jwks
            .keys
            .iter()
            .filter(|jwk| !matches!(&jwk.common.public_key_use, Some(PublicKeyUse::Encryption)))
            .filter_map(|jwk| match VerificationKey::from_jwk(jwk) {
                Ok(key) => Some(key),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unusable JWK");
                    None
                }
            })
            .collect();

        Self { keys }
    }

    /// Parses a JWKS document.
    ///
    /// # Errors
    ///
    /// Returns `KeySetError::ParseError` if the document is not a JWKS.
    pub fn from_jwks_json(document: &str) -> Result<Self, KeySetError> {
        let jwks: JwkSet =
            serde_json::from_str(document).map_err(|e| KeySetError::ParseError(e.to_string()))?;
        Ok(Self::from_jwks(&jwks))
    }

    /// Adds a key.
    #[must_use]
    pub fn with_key(mut self, key: VerificationKey) -> Self {
        self.keys.push(key);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VerificationKey> {
        self.keys.iter()
    }

    /// Returns the keys that may verify a token signed with `algorithm`.
    ///
    /// When the token names a `kid`, keys carrying a different `kid` are
    /// excluded. Keys without a `kid` or algorithm always qualify on that
    /// attribute.
    pub fn candidates<'a>(
        &'a self,
        kid: Option<&'a str>,
        algorithm: Algorithm,
    ) -> impl Iterator<Item = &'a VerificationKey> + 'a {
        self.keys
            .iter()
            .filter(move |key| key.accepts(kid, algorithm))
    }
}

/// Supplies the key set used to verify identity tokens.
#[async_trait]
pub trait KeySetProvider: Send + Sync {
    /// Returns the current key set.
    async fn key_set(&self) -> Result<Arc<KeySet>, KeySetError>;
}

/// A provider serving a fixed key set.
#[derive(Debug, Clone)]
pub struct StaticKeySet {
    keys: Arc<KeySet>,
}

impl StaticKeySet {
    #[must_use]
    pub fn new(keys: KeySet) -> Self {
        Self {
            keys: Arc::new(keys),
        }
    }
}

#[async_trait]
impl KeySetProvider for StaticKeySet {
    async fn key_set(&self) -> Result<Arc<KeySet>, KeySetError> {
        Ok(Arc::clone(&self.keys))
    }
}

/// Maps the JWK `alg` parameter to a signing algorithm.
fn jwk_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    jwk.common.key_algorithm.as_ref().and_then(|alg| match alg {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    })
}
