//! Relying-party client configuration.
//!
//! [`ClientOptions`] is the configuration surface of the client: client
//! credentials, redirect URI, provider endpoints and the validation
//! [`Policy`]. Invalid configuration is rejected when the client is built,
//! never while processing a login response.
//!
//! # Example (TOML)
//!
//! ```toml
//! client_id = "fhir-portal"
//! redirect_uri = "https://portal.example.com/callback"
//! load_profile = true
//!
//! [provider]
//! issuer = "https://login.example.com"
//! token_endpoint = "https://login.example.com/connect/token"
//! userinfo_endpoint = "https://login.example.com/connect/userinfo"
//!
//! [policy]
//! clock_skew = "2m"
//! valid_signature_algorithms = ["RS256", "ES384"]
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// OAuth 2.0 flow used by the client.
///
/// Only the authorization code flow is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    #[default]
    AuthorizationCode,
}

/// How the client secret is presented to the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthStyle {
    /// `client_id` and `client_secret` in the form body (`client_secret_post`).
    #[default]
    PostBody,
    /// HTTP Basic authentication header (`client_secret_basic`).
    BasicAuthentication,
}

/// Identity token validation policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Policy {
    /// Require every configured endpoint to share the issuer's origin.
    pub validate_endpoints: bool,

    /// Require the `iss` claim to equal the configured issuer.
    ///
    /// Disabling this weakens the trust boundary: any issuer whose keys are
    /// in the key set is accepted. It exists for multi-tenant providers whose
    /// `iss` is tenant-templated.
    pub validate_issuer_name: bool,

    /// Require the `at_hash` claim. A present `at_hash` is always verified.
    pub require_access_token_hash: bool,

    /// JWS algorithms accepted for identity tokens. Empty rejects every token.
    pub valid_signature_algorithms: BTreeSet<String>,

    /// Tolerance applied to `exp`, `iat` and `nbf`.
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            validate_endpoints: true,
            validate_issuer_name: true,
            require_access_token_hash: true,
            valid_signature_algorithms: [
                "RS256", "RS384", "RS512", "PS256", "PS384", "PS512", "ES256", "ES384",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            clock_skew: Duration::from_secs(300),
        }
    }
}

impl Policy {
    /// Replaces the algorithm allow-list.
    #[must_use]
    pub fn with_algorithms<I, S>(mut self, algorithms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.valid_signature_algorithms = algorithms.into_iter().map(Into::into).collect();
        self
    }

    /// Enables or disables the issuer name check.
    #[must_use]
    pub fn with_validate_issuer_name(mut self, validate: bool) -> Self {
        self.validate_issuer_name = validate;
        self
    }

    /// Enables or disables the endpoint origin check.
    #[must_use]
    pub fn with_validate_endpoints(mut self, validate: bool) -> Self {
        self.validate_endpoints = validate;
        self
    }

    /// Sets whether `at_hash` must be present.
    #[must_use]
    pub fn with_require_access_token_hash(mut self, require: bool) -> Self {
        self.require_access_token_hash = require;
        self
    }

    /// Sets the clock skew tolerance.
    #[must_use]
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Returns `true` if `alg` is on the allow-list.
    #[must_use]
    pub fn allows_algorithm(&self, alg: &str) -> bool {
        self.valid_signature_algorithms.contains(alg)
    }
}

/// Provider endpoint locations.
///
/// Normally filled from the provider's discovery document by the caller.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderEndpoints {
    /// Issuer identifier, compared verbatim with the `iss` claim.
    pub issuer: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorize_endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,
}

impl ProviderEndpoints {
    /// Creates endpoints with an issuer and token endpoint.
    #[must_use]
    pub fn new(issuer: impl Into<String>, token_endpoint: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            token_endpoint: Some(token_endpoint.into()),
            ..Self::default()
        }
    }

    /// Sets the authorize endpoint.
    #[must_use]
    pub fn with_authorize_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.authorize_endpoint = Some(endpoint.into());
        self
    }

    /// Sets the user-info endpoint.
    #[must_use]
    pub fn with_userinfo_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.userinfo_endpoint = Some(endpoint.into());
        self
    }

    /// Sets the end-session endpoint.
    #[must_use]
    pub fn with_end_session_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.end_session_endpoint = Some(endpoint.into());
        self
    }

    fn configured(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("authorize_endpoint", self.authorize_endpoint.as_deref()),
            ("token_endpoint", self.token_endpoint.as_deref()),
            ("userinfo_endpoint", self.userinfo_endpoint.as_deref()),
            ("end_session_endpoint", self.end_session_endpoint.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
    }
}

/// Protocol claims removed from [`LoginResult::user_claims`](crate::LoginResult::user_claims)
/// when `filter_claims` is enabled.
pub const DEFAULT_FILTERED_CLAIMS: &[&str] = &[
    "iss", "exp", "nbf", "aud", "nonce", "iat", "auth_time", "c_hash", "at_hash", "azp",
];

/// Relying-party client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Client identifier registered with the provider.
    pub client_id: String,

    /// Client secret for confidential clients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// How the secret is sent to the token endpoint.
    pub client_auth_style: ClientAuthStyle,

    /// Redirect URI registered with the provider.
    pub redirect_uri: String,

    /// Space-separated scopes requested at the authorize endpoint.
    pub scope: String,

    pub flow: Flow,

    /// Generate a PKCE verifier for each login attempt.
    pub use_pkce: bool,

    /// Fetch additional claims from the user-info endpoint after validation.
    pub load_profile: bool,

    /// Fail the login when the user-info call fails. Otherwise the failure
    /// is reported on the result and the validated identity is kept.
    pub fail_on_profile_error: bool,

    /// Strip protocol claims from the user claims of a login result.
    pub filter_claims: bool,

    /// Claims removed when `filter_claims` is enabled.
    pub filtered_claims: Vec<String>,

    /// Upper bound for each backchannel call.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Whether to allow HTTP endpoints (for testing only).
    pub allow_http: bool,

    pub provider: ProviderEndpoints,

    pub policy: Policy,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            client_auth_style: ClientAuthStyle::default(),
            redirect_uri: String::new(),
            scope: "openid profile".to_string(),
            flow: Flow::default(),
            use_pkce: true,
            load_profile: false,
            fail_on_profile_error: false,
            filter_claims: true,
            filtered_claims: DEFAULT_FILTERED_CLAIMS
                .iter()
                .map(|c| (*c).to_string())
                .collect(),
            request_timeout: Duration::from_secs(30),
            allow_http: false,
            provider: ProviderEndpoints::default(),
            policy: Policy::default(),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// The configuration document could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

impl ClientOptions {
    /// Creates options with the required values and defaults for the rest.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
        provider: ProviderEndpoints,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            provider,
            ..Self::default()
        }
    }

    /// Parses options from a TOML document.
    ///
    /// The result is not validated; [`OidcClient::new`](crate::OidcClient::new) does that.
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        toml::from_str(document).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Sets the client secret.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Sets the client authentication style.
    #[must_use]
    pub fn with_client_auth_style(mut self, style: ClientAuthStyle) -> Self {
        self.client_auth_style = style;
        self
    }

    /// Sets the requested scopes.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Enables or disables PKCE.
    #[must_use]
    pub fn with_pkce(mut self, enabled: bool) -> Self {
        self.use_pkce = enabled;
        self
    }

    /// Enables or disables the user-info call.
    #[must_use]
    pub fn with_load_profile(mut self, enabled: bool) -> Self {
        self.load_profile = enabled;
        self
    }

    /// Makes user-info failures fatal for the login.
    #[must_use]
    pub fn with_fail_on_profile_error(mut self, fail: bool) -> Self {
        self.fail_on_profile_error = fail;
        self
    }

    /// Enables or disables protocol claim filtering.
    #[must_use]
    pub fn with_filter_claims(mut self, filter: bool) -> Self {
        self.filter_claims = filter;
        self
    }

    /// Sets the backchannel request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Allows HTTP endpoints (for testing only).
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// Replaces the validation policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the client id, redirect URI, issuer or
    /// token endpoint is absent, or if `load_profile` is set without a
    /// user-info endpoint.
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - A URL cannot be parsed or uses a disallowed scheme
    /// - The signature algorithm allow-list is empty
    /// - `policy.validate_endpoints` is set and an endpoint's origin differs from the issuer's
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Missing("client_id".to_string()));
        }

        if self.redirect_uri.is_empty() {
            return Err(ConfigError::Missing("redirect_uri".to_string()));
        }
        Url::parse(&self.redirect_uri).map_err(|e| {
            ConfigError::InvalidValue(format!("redirect_uri '{}': {}", self.redirect_uri, e))
        })?;

        if self.provider.issuer.is_empty() {
            return Err(ConfigError::Missing("provider.issuer".to_string()));
        }
        if self.provider.token_endpoint.is_none() {
            return Err(ConfigError::Missing("provider.token_endpoint".to_string()));
        }
        if self.load_profile && self.provider.userinfo_endpoint.is_none() {
            return Err(ConfigError::Missing(
                "provider.userinfo_endpoint (required by load_profile)".to_string(),
            ));
        }

        if self.policy.valid_signature_algorithms.is_empty() {
            return Err(ConfigError::InvalidValue(
                "policy.valid_signature_algorithms cannot be empty".to_string(),
            ));
        }

        let issuer = self.parse_endpoint("provider.issuer", &self.provider.issuer)?;

        for (name, value) in self.provider.configured() {
            let endpoint = self.parse_endpoint(name, value)?;

            if self.policy.validate_endpoints && endpoint.origin() != issuer.origin() {
                return Err(ConfigError::InvalidValue(format!(
                    "{} '{}' is not on the issuer's origin '{}'",
                    name,
                    value,
                    issuer.origin().ascii_serialization()
                )));
            }
        }

        Ok(())
    }

    /// Parses an endpoint URL and checks its scheme.
    fn parse_endpoint(&self, name: &str, value: &str) -> Result<Url, ConfigError> {
        let url = Url::parse(value)
            .map_err(|e| ConfigError::InvalidValue(format!("{} '{}': {}", name, value, e)))?;

        match url.scheme() {
            "https" => Ok(url),
            "http" if self.allow_http => Ok(url),
            other => Err(ConfigError::InvalidValue(format!(
                "{} uses scheme '{}': only HTTPS is allowed",
                name, other
            ))),
        }
    }
}
