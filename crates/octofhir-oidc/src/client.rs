//! Login response processing.
//!
//! [`OidcClient`] turns an authorization response into verified tokens and
//! a validated identity. Each call to [`OidcClient::process_response`] runs
//! these steps in order and stops at the first failure:
//!
//! 1. Parse the response; surface an authorization server error verbatim
//! 2. Compare `state` with the issued one
//! 3. Extract the authorization code
//! 4. Redeem the code at the token endpoint
//! 5. Check the token response shape
//! 6. Validate the identity token
//! 7. Optionally load the user-info profile
//! 8. Assemble the [`LoginResult`]
//!
//! The client holds only read-only configuration and shared collaborators, so
//! one instance can process any number of concurrent login attempts. Dropping
//! a `process_response` future aborts the attempt without side effects.

use std::sync::Arc;

use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::authorize::AuthorizeResponse;
use crate::backchannel::{Backchannel, ReqwestBackchannel};
use crate::config::{ClientOptions, ConfigError};
use crate::error::{IdentityTokenError, LoginError, ProfileError};
use crate::id_token::{IdentityTokenValidator, ValidatedIdentity};
use crate::keys::KeySetProvider;
use crate::state::{LoginState, constant_time_eq};
use crate::token::{ExtraParameters, TokenClient};
use crate::userinfo::{UserInfoClient, merge_claims};

// =============================================================================
// Login Result
// =============================================================================

/// Tokens and identity of a successful login.
#[derive(Debug)]
pub struct AuthenticatedLogin {
    pub access_token: String,
    /// The raw identity token.
    pub identity_token: String,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    /// Access token expiry derived from `expires_in` at redemption time.
    pub access_token_expiration: Option<OffsetDateTime>,
    pub identity: ValidatedIdentity,
    /// Identity claims with protocol claims removed when filtering is enabled.
    pub user_claims: Map<String, Value>,
    /// A non-fatal user-info failure.
    pub profile_error: Option<ProfileError>,
}

/// Outcome of one login attempt.
///
/// A failure carries no tokens or identity.
#[derive(Debug)]
pub enum LoginResult {
    Success(Box<AuthenticatedLogin>),
    Failure(LoginError),
}

impl LoginResult {
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    #[must_use]
    pub fn error(&self) -> Option<&LoginError> {
        match self {
            Self::Failure(e) => Some(e),
            Self::Success(_) => None,
        }
    }

    /// Returns the failure message, e.g. `Error validating token response: Invalid nonce.`
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error().map(ToString::to_string)
    }

    #[must_use]
    pub fn login(&self) -> Option<&AuthenticatedLogin> {
        match self {
            Self::Success(login) => Some(login.as_ref()),
            Self::Failure(_) => None,
        }
    }

    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.login().map(|l| l.access_token.as_str())
    }

    #[must_use]
    pub fn identity_token(&self) -> Option<&str> {
        self.login().map(|l| l.identity_token.as_str())
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.login().and_then(|l| l.refresh_token.as_deref())
    }

    #[must_use]
    pub fn access_token_expiration(&self) -> Option<OffsetDateTime> {
        self.login().and_then(|l| l.access_token_expiration)
    }

    #[must_use]
    pub fn identity(&self) -> Option<&ValidatedIdentity> {
        self.login().map(|l| &l.identity)
    }

    #[must_use]
    pub fn user_claims(&self) -> Option<&Map<String, Value>> {
        self.login().map(|l| &l.user_claims)
    }

    /// Converts into a `Result`.
    pub fn into_result(self) -> Result<AuthenticatedLogin, LoginError> {
        match self {
            Self::Success(login) => Ok(*login),
            Self::Failure(e) => Err(e),
        }
    }
}

impl From<Result<AuthenticatedLogin, LoginError>> for LoginResult {
    fn from(result: Result<AuthenticatedLogin, LoginError>) -> Self {
        match result {
            Ok(login) => Self::Success(Box::new(login)),
            Err(e) => Self::Failure(e),
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// OpenID Connect relying-party client.
#[derive(Clone)]
pub struct OidcClient {
    options: Arc<ClientOptions>,
    token_client: TokenClient,
    validator: IdentityTokenValidator,
    userinfo: Option<UserInfoClient>,
    backchannel: Arc<dyn Backchannel>,
    keys: Arc<dyn KeySetProvider>,
}

impl OidcClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns an error if `options` fail [`ClientOptions::validate`].
    pub fn new(
        options: ClientOptions,
        backchannel: Arc<dyn Backchannel>,
        keys: Arc<dyn KeySetProvider>,
    ) -> Result<Self, ConfigError> {
        options.validate()?;

        let token_client = TokenClient::new(&options)?;
        let validator = IdentityTokenValidator::from_options(&options);
        let userinfo = UserInfoClient::from_options(&options)?;

        tracing::debug!(
            client_id = %options.client_id,
            issuer = %options.provider.issuer,
            "OIDC client configured"
        );

        Ok(Self {
            options: Arc::new(options),
            token_client,
            validator,
            userinfo,
            backchannel,
            keys,
        })
    }

    /// Creates a client that uses [`ReqwestBackchannel`].
    ///
    /// # Errors
    ///
    /// Returns an error if the options are invalid or the HTTP client cannot
    /// be built.
    pub fn with_reqwest(
        options: ClientOptions,
        keys: Arc<dyn KeySetProvider>,
    ) -> Result<Self, ConfigError> {
        let backchannel = ReqwestBackchannel::new(options.request_timeout)
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        Self::new(options, Arc::new(backchannel), keys)
    }

    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Starts a login attempt.
    ///
    /// The caller keeps the returned state until the callback arrives and
    /// sends its `state`, `nonce` and code challenge with the authorize request.
    #[must_use]
    pub fn prepare_login(&self) -> LoginState {
        LoginState::generate(&self.options)
    }

    /// Processes an authorization response.
    pub async fn process_response(&self, raw: &str, login: &LoginState) -> LoginResult {
        self.process_response_with(raw, login, &ExtraParameters::new())
            .await
    }

    /// Processes an authorization response, adding `extra` to the token request.
    pub async fn process_response_with(
        &self,
        raw: &str,
        login: &LoginState,
        extra: &ExtraParameters,
    ) -> LoginResult {
        let result = self.run(raw, login, extra).await;

        match &result {
            Ok(authenticated) => tracing::info!(
                subject = %authenticated.identity.subject,
                issuer = %authenticated.identity.issuer,
                "Login succeeded"
            ),
            Err(e) => tracing::warn!(error = %e, "Login failed"),
        }

        result.into()
    }

    async fn run(
        &self,
        raw: &str,
        login: &LoginState,
        extra: &ExtraParameters,
    ) -> Result<AuthenticatedLogin, LoginError> {
        let response = AuthorizeResponse::parse(raw);

        if let Some(error) = response.error {
            return Err(LoginError::authorization_server(
                error,
                response.error_description,
            ));
        }

        match response.state.as_deref() {
            Some(state) if constant_time_eq(state, login.state()) => {}
            _ => return Err(LoginError::StateMismatch),
        }

        let code = response.code.ok_or(LoginError::MissingCode)?;

        let redeemed_at = OffsetDateTime::now_utc();
        let tokens = self
            .token_client
            .redeem(self.backchannel.as_ref(), &code, login, extra)
            .await?;

        let (access_token, identity_token) = tokens.validate()?;

        let token = self.validator.inspect(identity_token)?;

        // Keys are loaded only for a well-formed token with an allowed algorithm.
        let keys = self
            .keys
            .key_set()
            .await
            .map_err(IdentityTokenError::from)?;

        let mut identity =
            self.validator
                .verify(token, login.nonce(), &keys, Some(access_token))?;

        tracing::debug!(subject = %identity.subject, "Identity token validated");

        let mut profile_error = None;
        if self.options.load_profile {
            if let Err(e) = self.load_profile(access_token, &mut identity).await {
                if self.options.fail_on_profile_error {
                    return Err(e.into());
                }
                tracing::warn!(error = %e, "Failed to load user info, keeping identity token claims");
                profile_error = Some(e);
            }
        }

        let user_claims = self.user_claims(&identity.claims);

        Ok(AuthenticatedLogin {
            access_token: access_token.to_string(),
            identity_token: identity_token.to_string(),
            refresh_token: tokens.refresh_token.clone(),
            token_type: tokens.token_type.clone(),
            access_token_expiration: tokens.expires_at(redeemed_at),
            identity,
            user_claims,
            profile_error,
        })
    }

    async fn load_profile(
        &self,
        access_token: &str,
        identity: &mut ValidatedIdentity,
    ) -> Result<(), ProfileError> {
        let userinfo = self.userinfo.as_ref().ok_or(ProfileError::MissingEndpoint)?;
        let profile = userinfo
            .fetch(self.backchannel.as_ref(), access_token)
            .await?;

        merge_claims(&mut identity.claims, &identity.subject, profile)
    }

    fn user_claims(&self, claims: &Map<String, Value>) -> Map<String, Value> {
        if !self.options.filter_claims {
            return claims.clone();
        }

        claims
            .iter()
            .filter(|(name, _)| !self.options.filtered_claims.iter().any(|f| f == *name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

impl std::fmt::Debug for OidcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcClient")
            .field("client_id", &self.options.client_id)
            .field("issuer", &self.options.provider.issuer)
            .field("token_client", &self.token_client)
            .finish_non_exhaustive()
    }
}
