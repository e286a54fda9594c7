//! Shared fixtures for login flow tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use octofhir_oidc::{
    Backchannel, BackchannelRequest, BackchannelResponse, ClientOptions, KeySet, OidcClient,
    Policy, ProviderEndpoints, StaticKeySet, TransportError, VerificationKey, access_token_hash,
};
use serde_json::{Value, json};

pub const ISSUER: &str = "https://auth.example.com";
pub const CLIENT_ID: &str = "client";
pub const REDIRECT_URI: &str = "https://app.example.com/callback";
pub const SECRET: &[u8] = b"secret-key-for-tests-only-123456";
pub const KID: &str = "k1";

/// In-memory backchannel that records every request.
///
/// Requests to `/userinfo` get the user-info response (404 when unset),
/// everything else gets the token response.
pub struct RecordingBackchannel {
    token_response: BackchannelResponse,
    userinfo_response: Option<BackchannelResponse>,
    delay: Option<Duration>,
    requests: Mutex<Vec<BackchannelRequest>>,
}

impl RecordingBackchannel {
    pub fn new(token_response: BackchannelResponse) -> Self {
        Self {
            token_response,
            userinfo_response: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replies to the token endpoint with `body` and status 200.
    pub fn tokens(body: Value) -> Self {
        Self::new(BackchannelResponse::new(200, body.to_string()))
    }

    pub fn with_userinfo(mut self, status: u16, body: Value) -> Self {
        self.userinfo_response = Some(BackchannelResponse::new(status, body.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<BackchannelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn token_requests(&self) -> Vec<BackchannelRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.path() == "/token")
            .collect()
    }
}

#[async_trait]
impl Backchannel for RecordingBackchannel {
    async fn send(
        &self,
        request: BackchannelRequest,
    ) -> Result<BackchannelResponse, TransportError> {
        let is_userinfo = request.url.path() == "/userinfo";
        self.requests.lock().unwrap().push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if is_userinfo {
            return Ok(self
                .userinfo_response
                .clone()
                .unwrap_or_else(|| BackchannelResponse::new(404, "")));
        }

        Ok(self.token_response.clone())
    }
}

pub fn options() -> ClientOptions {
    ClientOptions::new(
        CLIENT_ID,
        REDIRECT_URI,
        ProviderEndpoints::new(ISSUER, format!("{ISSUER}/token"))
            .with_authorize_endpoint(format!("{ISSUER}/authorize"))
            .with_userinfo_endpoint(format!("{ISSUER}/userinfo")),
    )
    .with_client_secret("secret")
    .with_policy(Policy::default().with_algorithms(["HS256", "HS384", "ES384"]))
}

pub fn hmac_keys() -> KeySet {
    KeySet::new().with_key(VerificationKey::new(DecodingKey::from_secret(SECRET)).with_kid(KID))
}

pub fn client(backchannel: &Arc<RecordingBackchannel>, options: ClientOptions) -> OidcClient {
    client_with_keys(backchannel, options, hmac_keys())
}

pub fn client_with_keys(
    backchannel: &Arc<RecordingBackchannel>,
    options: ClientOptions,
    keys: KeySet,
) -> OidcClient {
    let backchannel: Arc<dyn Backchannel> = backchannel.clone();
    OidcClient::new(options, backchannel, Arc::new(StaticKeySet::new(keys))).unwrap()
}

pub fn now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Identity token claims bound to `nonce` and `access_token`.
pub fn claims(nonce: &str, access_token: &str) -> Value {
    json!({
        "iss": ISSUER,
        "sub": "alice",
        "aud": CLIENT_ID,
        "nonce": nonce,
        "iat": now(),
        "exp": now() + 300,
        "auth_time": now() - 5,
        "at_hash": access_token_hash(access_token, "HS256").unwrap(),
        "name": "Alice Example",
    })
}

pub fn sign(claims: &Value) -> String {
    sign_with(Algorithm::HS256, SECRET, claims)
}

pub fn sign_with(alg: Algorithm, secret: &[u8], claims: &Value) -> String {
    let mut header = Header::new(alg);
    header.kid = Some(KID.to_string());
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(secret)).unwrap()
}

/// A token endpoint response body.
pub fn token_body(access_token: &str, id_token: &str) -> Value {
    json!({
        "access_token": access_token,
        "id_token": id_token,
        "refresh_token": "refresh",
        "token_type": "Bearer",
        "expires_in": 300,
    })
}
