//! Token endpoint client and token response validation.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use url::Url;

use crate::backchannel::{Backchannel, BackchannelRequest};
use crate::config::{ClientAuthStyle, ClientOptions, ConfigError};
use crate::error::{RedemptionError, TokenResponseError, TransportError};
use crate::state::LoginState;

/// Caller-supplied parameters appended verbatim to the token request body.
///
/// Names the client already sends (`grant_type`, `code`, `redirect_uri`,
/// `client_id`, `client_secret`, `code_verifier`) are dropped with a warning,
/// so an extra can never change which code is redeemed or for which client.
pub type ExtraParameters = BTreeMap<String, String>;

/// Parameters owned by the client. Extra parameters cannot replace them.
const RESERVED_PARAMETERS: &[&str] = &[
    "grant_type",
    "code",
    "redirect_uri",
    "client_id",
    "client_secret",
    "code_verifier",
];

// =============================================================================
// Token Response
// =============================================================================

/// Token endpoint response.
///
/// Every field is optional here; [`TokenResponse::validate`] enforces the
/// shape a login needs.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TokenResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Access token lifetime in seconds.
    #[serde(
        default,
        deserialize_with = "deserialize_expires_in",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_in: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Fields not modelled above.
    #[serde(flatten)]
    pub raw: serde_json::Map<String, serde_json::Value>,
}

impl TokenResponse {
    /// Checks that the access token and identity token are present and
    /// non-empty, in that order. Token contents are not inspected.
    ///
    /// Returns `(access_token, id_token)` on success.
    pub fn validate(&self) -> Result<(&str, &str), TokenResponseError> {
        let access_token = self
            .access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(TokenResponseError::MissingAccessToken)?;

        let id_token = self
            .id_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(TokenResponseError::MissingIdentityToken)?;

        Ok((access_token, id_token))
    }

    /// Returns the access token expiration relative to `issued_at`.
    #[must_use]
    pub fn expires_at(&self, issued_at: OffsetDateTime) -> Option<OffsetDateTime> {
        self.expires_in
            .filter(|secs| *secs > 0)
            .and_then(|secs| issued_at.checked_add(time::Duration::seconds(secs)))
    }
}

/// Accepts `expires_in` as a number or a numeric string.
fn deserialize_expires_in<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Integer(i64),
        Float(f64),
        Text(String),
    }

    Ok(match Option::<NumberOrString>::deserialize(deserializer)? {
        Some(NumberOrString::Integer(n)) => Some(n),
        Some(NumberOrString::Float(f)) if f.is_finite() => Some(f as i64),
        Some(NumberOrString::Text(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// OAuth error document returned by the token endpoint.
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    error_description: Option<String>,
}

// =============================================================================
// Token Client
// =============================================================================

/// Redeems authorization codes at the token endpoint.
#[derive(Clone)]
pub struct TokenClient {
    token_endpoint: Url,
    client_id: String,
    client_secret: Option<String>,
    auth_style: ClientAuthStyle,
    request_timeout: Duration,
}

impl TokenClient {
    /// Creates a token client from client options.
    ///
    /// # Errors
    ///
    /// Returns an error if the token endpoint is missing or not a URL.
    pub fn new(options: &ClientOptions) -> Result<Self, ConfigError> {
        let endpoint = options
            .provider
            .token_endpoint
            .as_deref()
            .ok_or_else(|| ConfigError::Missing("provider.token_endpoint".to_string()))?;

        let token_endpoint = Url::parse(endpoint).map_err(|e| {
            ConfigError::InvalidValue(format!("provider.token_endpoint '{}': {}", endpoint, e))
        })?;

        Ok(Self {
            token_endpoint,
            client_id: options.client_id.clone(),
            client_secret: options.client_secret.clone(),
            auth_style: options.client_auth_style,
            request_timeout: options.request_timeout,
        })
    }

    /// Returns the token endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.token_endpoint
    }

    /// Builds the code redemption request.
    ///
    /// The body carries `grant_type`, `code`, `redirect_uri` and `client_id`,
    /// then `client_secret` (post-body style) and `code_verifier` when
    /// available, then the extra parameters. Extras named like one of those
    /// fields are dropped.
    #[must_use]
    pub fn build_request(
        &self,
        code: &str,
        login: &LoginState,
        extra: &ExtraParameters,
    ) -> BackchannelRequest {
        let mut form: Vec<(String, String)> = vec![
            ("grant_type".into(), "authorization_code".into()),
            ("code".into(), code.into()),
            ("redirect_uri".into(), login.redirect_uri().into()),
            ("client_id".into(), self.client_id.clone()),
        ];

        let mut authorization = None;
        if let Some(secret) = &self.client_secret {
            match self.auth_style {
                ClientAuthStyle::PostBody => form.push(("client_secret".into(), secret.clone())),
                ClientAuthStyle::BasicAuthentication => {
                    authorization = Some(basic_authorization(&self.client_id, secret));
                }
            }
        }

        if let Some(verifier) = login.code_verifier() {
            form.push(("code_verifier".into(), verifier.as_str().into()));
        }

        for (key, value) in extra {
            if RESERVED_PARAMETERS.contains(&key.as_str()) {
                tracing::warn!(parameter = %key, "Ignoring extra parameter that overrides a token request field");
                continue;
            }
            form.push((key.clone(), value.clone()));
        }

        let request = BackchannelRequest::post_form(self.token_endpoint.clone(), form)
            .with_header("Accept", "application/json");

        match authorization {
            Some(value) => request.with_header("Authorization", value),
            None => request,
        }
    }

    /// Exchanges `code` for tokens.
    ///
    /// The call is bounded by the configured request timeout. Failures are not
    /// retried.
    ///
    /// # Errors
    ///
    /// - `RedemptionError::Transport` if the backchannel fails or times out
    /// - `RedemptionError::OAuth` if the endpoint returns an OAuth error document
    /// - `RedemptionError::Status` for other non-success statuses
    /// - `RedemptionError::InvalidResponse` if the body is not a JSON object
    pub async fn redeem(
        &self,
        backchannel: &dyn Backchannel,
        code: &str,
        login: &LoginState,
        extra: &ExtraParameters,
    ) -> Result<TokenResponse, RedemptionError> {
        let request = self.build_request(code, login, extra);

        tracing::debug!(
            "Exchanging authorization code with token endpoint: {}",
            self.token_endpoint
        );

        let response = tokio::time::timeout(self.request_timeout, backchannel.send(request))
            .await
            .map_err(|_| TransportError::Timeout)??;

        if !response.is_success() {
            if let Ok(oauth_error) = serde_json::from_str::<OAuthErrorResponse>(&response.body) {
                return Err(RedemptionError::oauth(
                    oauth_error.error,
                    oauth_error.error_description.unwrap_or_default(),
                ));
            }

            return Err(RedemptionError::Status {
                status: response.status,
                body: response.body,
            });
        }

        serde_json::from_str::<TokenResponse>(&response.body)
            .map_err(|e| RedemptionError::InvalidResponse(e.to_string()))
    }
}

impl std::fmt::Debug for TokenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenClient")
            .field("token_endpoint", &self.token_endpoint.as_str())
            .field("client_id", &self.client_id)
            .field("auth_style", &self.auth_style)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// `client_secret_basic` header value: both parts form-urlencoded first.
fn basic_authorization(client_id: &str, secret: &str) -> String {
    let id: String = url::form_urlencoded::byte_serialize(client_id.as_bytes()).collect();
    let secret: String = url::form_urlencoded::byte_serialize(secret.as_bytes()).collect();
    format!("Basic {}", STANDARD.encode(format!("{}:{}", id, secret)))
}
