//! User-info endpoint client.

use std::time::Duration;

use serde_json::{Map, Value};
use url::Url;

use crate::backchannel::{Backchannel, BackchannelRequest};
use crate::config::{ClientOptions, ConfigError};
use crate::error::{ProfileError, TransportError};

/// Loads claims from the user-info endpoint.
#[derive(Debug, Clone)]
pub struct UserInfoClient {
    endpoint: Url,
    request_timeout: Duration,
}

impl UserInfoClient {
    #[must_use]
    pub fn new(endpoint: Url, request_timeout: Duration) -> Self {
        Self {
            endpoint,
            request_timeout,
        }
    }

    /// Creates a client from options. Returns `None` when no user-info
    /// endpoint is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured endpoint is not a URL.
    pub fn from_options(options: &ClientOptions) -> Result<Option<Self>, ConfigError> {
        let Some(endpoint) = options.provider.userinfo_endpoint.as_deref() else {
            return Ok(None);
        };

        let url = Url::parse(endpoint).map_err(|e| {
            ConfigError::InvalidValue(format!("provider.userinfo_endpoint '{}': {}", endpoint, e))
        })?;

        Ok(Some(Self::new(url, options.request_timeout)))
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Fetches the user-info claims for `access_token`.
    ///
    /// # Errors
    ///
    /// Fails on transport errors and timeouts, non-success statuses, and
    /// bodies that are not a JSON object.
    pub async fn fetch(
        &self,
        backchannel: &dyn Backchannel,
        access_token: &str,
    ) -> Result<Map<String, Value>, ProfileError> {
        let request = BackchannelRequest::get(self.endpoint.clone())
            .with_header("Authorization", format!("Bearer {}", access_token))
            .with_header("Accept", "application/json");

        tracing::debug!("Fetching user info from {}", self.endpoint);

        let response = tokio::time::timeout(self.request_timeout, backchannel.send(request))
            .await
            .map_err(|_| TransportError::Timeout)??;

        if !response.is_success() {
            return Err(ProfileError::Status(response.status));
        }

        serde_json::from_str::<Map<String, Value>>(&response.body)
            .map_err(|e| ProfileError::InvalidResponse(e.to_string()))
    }
}

/// Merges user-info claims into validated identity claims.
///
/// The user-info `sub` must equal `subject`. Claims already asserted by the
/// identity token are kept.
///
/// # Errors
///
/// Returns `ProfileError::SubjectMismatch` if the subjects differ or the
/// user-info response carries no `sub`.
pub fn merge_claims(
    claims: &mut Map<String, Value>,
    subject: &str,
    profile: Map<String, Value>,
) -> Result<(), ProfileError> {
    if profile.get("sub").and_then(Value::as_str) != Some(subject) {
        return Err(ProfileError::SubjectMismatch);
    }

    for (name, value) in profile {
        claims.entry(name).or_insert(value);
    }

    Ok(())
}
