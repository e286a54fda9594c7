//! Identity token validation.
//!
//! [`IdentityTokenValidator::validate`] runs every check in a fixed order and
//! stops at the first failure:
//!
//! 1. Compact JWT structure (three base64url segments, JSON header and payload)
//! 2. Header `alg` against the policy allow-list
//! 3. Signature, against keys matching the header `kid` and `alg`
//! 4. `iss` (unless `validate_issuer_name` is off)
//! 5. `aud` contains the client id, and `azp` when present
//! 6. `nonce`
//! 7. `at_hash` (required by policy, verified whenever present)
//! 8. `exp`, `iat` and `nbf` with clock skew
//! 9. `sub`
//!
//! The algorithm check runs before any cryptographic work so that disallowed
//! algorithms (including `none`) never reach a verifier.

use std::str::FromStr;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, Validation};
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256, Sha384, Sha512};
use time::OffsetDateTime;

use crate::config::{ClientOptions, Policy};
use crate::error::IdentityTokenError;
use crate::keys::KeySet;
use crate::state::constant_time_eq;

// =============================================================================
// Validated Identity
// =============================================================================

/// An identity token that passed every check.
#[derive(Debug, Clone)]
pub struct ValidatedIdentity {
    /// Every claim of the token, plus user-info claims when a profile was loaded.
    pub claims: Map<String, Value>,
    pub subject: String,
    pub issuer: String,
    /// The algorithm that verified the signature.
    pub signing_algorithm: Algorithm,
}

impl ValidatedIdentity {
    /// Returns a claim by name.
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// Returns a string claim by name.
    #[must_use]
    pub fn string_claim(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }

    /// Returns the token expiration.
    #[must_use]
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        numeric_claim(&self.claims, "exp")
            .and_then(|exp| OffsetDateTime::from_unix_timestamp(exp).ok())
    }
}

// =============================================================================
// Access Token Hash
// =============================================================================

/// Computes the `at_hash` value of `access_token` for a token signed with `alg`.
///
/// The digest follows the algorithm's hash size: SHA-256 for `*256`, SHA-384
/// for `*384`, SHA-512 for `*512` and `EdDSA`. The left half of the digest is
/// base64url-encoded. Returns `None` for algorithms without a known digest.
#[must_use]
pub fn access_token_hash(access_token: &str, alg: &str) -> Option<String> {
    let digest: Vec<u8> = if alg.ends_with("256") {
        Sha256::digest(access_token.as_bytes()).to_vec()
    } else if alg.ends_with("384") {
        Sha384::digest(access_token.as_bytes()).to_vec()
    } else if alg.ends_with("512") || alg == "EdDSA" {
        Sha512::digest(access_token.as_bytes()).to_vec()
    } else {
        return None;
    };

    Some(URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2]))
}

// =============================================================================
// Validator
// =============================================================================

#[derive(Debug, Deserialize)]
struct RawHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

/// An identity token whose structure and algorithm were accepted but whose
/// signature and claims are not yet verified.
///
/// Produced by [`IdentityTokenValidator::inspect`] so that malformed tokens
/// and disallowed algorithms are rejected before any key material is loaded.
#[derive(Debug)]
pub struct UnverifiedToken<'a> {
    raw: &'a str,
    header: RawHeader,
    claims: Map<String, Value>,
    algorithm: Algorithm,
}

impl UnverifiedToken<'_> {
    /// The header algorithm.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The header `kid`, if any.
    #[must_use]
    pub fn kid(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }
}

struct ParsedToken {
    header: RawHeader,
    claims: Map<String, Value>,
}

/// Validates identity tokens for one client and issuer.
#[derive(Debug, Clone)]
pub struct IdentityTokenValidator {
    policy: Policy,
    issuer: String,
    client_id: String,
}

impl IdentityTokenValidator {
    #[must_use]
    pub fn new(policy: Policy, issuer: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            policy,
            issuer: issuer.into(),
            client_id: client_id.into(),
        }
    }

    /// Creates a validator from client options.
    #[must_use]
    pub fn from_options(options: &ClientOptions) -> Self {
        Self::new(
            options.policy.clone(),
            options.provider.issuer.clone(),
            options.client_id.clone(),
        )
    }

    #[must_use]
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Validates `id_token` against the current time.
    ///
    /// `nonce` is the value issued with the login attempt. `access_token`,
    /// when given, is checked against the `at_hash` claim.
    pub fn validate(
        &self,
        id_token: &str,
        nonce: &str,
        keys: &KeySet,
        access_token: Option<&str>,
    ) -> Result<ValidatedIdentity, IdentityTokenError> {
        self.validate_at(id_token, nonce, keys, access_token, OffsetDateTime::now_utc())
    }

    /// Validates `id_token` as of `now`.
    pub fn validate_at(
        &self,
        id_token: &str,
        nonce: &str,
        keys: &KeySet,
        access_token: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<ValidatedIdentity, IdentityTokenError> {
        let token = self.inspect(id_token)?;
        self.verify_at(token, nonce, keys, access_token, now)
    }

    /// Runs the structural and algorithm checks.
    ///
    /// No key is needed, so callers that load keys remotely can do so only
    /// once this succeeds.
    pub fn inspect<'a>(&self, id_token: &'a str) -> Result<UnverifiedToken<'a>, IdentityTokenError> {
        let ParsedToken { header, claims } = parse_compact(id_token)?;
        let algorithm = self.check_algorithm(&header.alg)?;

        Ok(UnverifiedToken {
            raw: id_token,
            header,
            claims,
            algorithm,
        })
    }

    /// Verifies the signature and claims of an inspected token against the
    /// current time.
    pub fn verify(
        &self,
        token: UnverifiedToken<'_>,
        nonce: &str,
        keys: &KeySet,
        access_token: Option<&str>,
    ) -> Result<ValidatedIdentity, IdentityTokenError> {
        self.verify_at(token, nonce, keys, access_token, OffsetDateTime::now_utc())
    }

    /// Verifies the signature and claims of an inspected token as of `now`.
    pub fn verify_at(
        &self,
        token: UnverifiedToken<'_>,
        nonce: &str,
        keys: &KeySet,
        access_token: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<ValidatedIdentity, IdentityTokenError> {
        let UnverifiedToken {
            raw,
            header,
            claims,
            algorithm,
        } = token;

        verify_signature(raw, header.kid.as_deref(), algorithm, keys)?;

        let issuer = string_claim(&claims, "iss").ok_or(IdentityTokenError::MissingClaim("iss"))?;
        if self.policy.validate_issuer_name && issuer != self.issuer {
            return Err(IdentityTokenError::invalid_issuer(&self.issuer, issuer));
        }

        self.check_audience(&claims)?;

        match string_claim(&claims, "nonce") {
            Some(claimed) if constant_time_eq(claimed, nonce) => {}
            _ => return Err(IdentityTokenError::InvalidNonce),
        }

        self.check_access_token_hash(&claims, &header.alg, access_token)?;
        self.check_times(&claims, now)?;

        let subject = string_claim(&claims, "sub")
            .filter(|s| !s.is_empty())
            .ok_or(IdentityTokenError::MissingClaim("sub"))?
            .to_string();
        let issuer = issuer.to_string();

        Ok(ValidatedIdentity {
            claims,
            subject,
            issuer,
            signing_algorithm: algorithm,
        })
    }

    fn check_algorithm(&self, alg: &str) -> Result<Algorithm, IdentityTokenError> {
        if self.policy.valid_signature_algorithms.is_empty() {
            return Err(IdentityTokenError::NoValidAlgorithms);
        }

        if !self.policy.allows_algorithm(alg) {
            return Err(IdentityTokenError::InvalidAlgorithm(alg.to_string()));
        }

        Algorithm::from_str(alg).map_err(|_| IdentityTokenError::InvalidAlgorithm(alg.to_string()))
    }

    fn check_audience(&self, claims: &Map<String, Value>) -> Result<(), IdentityTokenError> {
        let audiences: Vec<&str> = match claims.get("aud") {
            Some(Value::String(aud)) => vec![aud.as_str()],
            Some(Value::Array(values)) => values.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };

        if !audiences.contains(&self.client_id.as_str()) {
            return Err(IdentityTokenError::InvalidAudience);
        }

        if let Some(azp) = claims.get("azp") {
            if azp.as_str() != Some(self.client_id.as_str()) {
                return Err(IdentityTokenError::InvalidAuthorizedParty);
            }
        }

        Ok(())
    }

    fn check_access_token_hash(
        &self,
        claims: &Map<String, Value>,
        alg: &str,
        access_token: Option<&str>,
    ) -> Result<(), IdentityTokenError> {
        let Some(claimed) = string_claim(claims, "at_hash") else {
            if self.policy.require_access_token_hash {
                return Err(IdentityTokenError::AtHashMissing);
            }
            return Ok(());
        };

        let Some(access_token) = access_token else {
            return Ok(());
        };

        match access_token_hash(access_token, alg) {
            Some(expected) if constant_time_eq(&expected, claimed) => Ok(()),
            _ => Err(IdentityTokenError::InvalidAtHash),
        }
    }

    fn check_times(
        &self,
        claims: &Map<String, Value>,
        now: OffsetDateTime,
    ) -> Result<(), IdentityTokenError> {
        let now = now.unix_timestamp();
        let skew = i64::try_from(self.policy.clock_skew.as_secs()).unwrap_or(i64::MAX);

        let exp = numeric_claim(claims, "exp").ok_or(IdentityTokenError::MissingClaim("exp"))?;
        if now > exp.saturating_add(skew) {
            return Err(IdentityTokenError::Expired);
        }

        let iat = numeric_claim(claims, "iat").ok_or(IdentityTokenError::MissingClaim("iat"))?;
        if iat > now.saturating_add(skew) {
            return Err(IdentityTokenError::IssuedInFuture);
        }

        if let Some(nbf) = numeric_claim(claims, "nbf") {
            if nbf > now.saturating_add(skew) {
                return Err(IdentityTokenError::NotYetValid);
            }
        }

        Ok(())
    }
}

/// Splits and decodes a compact JWT without verifying it.
fn parse_compact(token: &str) -> Result<ParsedToken, IdentityTokenError> {
    let segments: Vec<&str> = token.trim().split('.').collect();
    if segments.len() != 3 {
        return Err(IdentityTokenError::Malformed(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    let header_bytes = URL_SAFE_NO_PAD
        .decode(segments[0])
        .map_err(|e| IdentityTokenError::Malformed(format!("header is not base64url: {}", e)))?;
    let payload_bytes = URL_SAFE_NO_PAD
        .decode(segments[1])
        .map_err(|e| IdentityTokenError::Malformed(format!("payload is not base64url: {}", e)))?;
    URL_SAFE_NO_PAD
        .decode(segments[2])
        .map_err(|e| IdentityTokenError::Malformed(format!("signature is not base64url: {}", e)))?;

    let header: RawHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| IdentityTokenError::Malformed(format!("invalid header: {}", e)))?;
    let claims: Map<String, Value> = serde_json::from_slice(&payload_bytes)
        .map_err(|e| IdentityTokenError::Malformed(format!("invalid payload: {}", e)))?;

    Ok(ParsedToken { header, claims })
}

/// Verifies the signature with the first candidate key that accepts it.
fn verify_signature(
    token: &str,
    kid: Option<&str>,
    algorithm: Algorithm,
    keys: &KeySet,
) -> Result<(), IdentityTokenError> {
    if keys.is_empty() {
        return Err(IdentityTokenError::Signature(
            "key set is empty".to_string(),
        ));
    }

    // Claims are checked separately with the configured skew.
    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;

    let mut last_error = None;
    for key in keys.candidates(kid, algorithm) {
        match jsonwebtoken::decode::<Value>(token.trim(), key.decoding_key(), &validation) {
            Ok(_) => {
                tracing::debug!(kid = ?key.kid(), ?algorithm, "Identity token signature verified");
                return Ok(());
            }
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    Err(IdentityTokenError::Signature(match last_error {
        Some(reason) => reason,
        None => format!(
            "no key matches kid '{}' and algorithm {:?}",
            kid.unwrap_or("<none>"),
            algorithm
        ),
    }))
}

fn string_claim<'a>(claims: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    claims.get(name).and_then(Value::as_str)
}

fn numeric_claim(claims: &Map<String, Value>, name: &str) -> Option<i64> {
    let value = claims.get(name)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f.floor() as i64))
}
