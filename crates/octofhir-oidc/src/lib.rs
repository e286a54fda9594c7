//! # octofhir-oidc
//!
//! OpenID Connect relying-party client for OctoFHIR.
//!
//! This crate provides:
//! - Anti-replay login state (state, nonce, PKCE)
//! - Authorization response parsing
//! - Authorization code redemption over a pluggable backchannel
//! - Identity token validation against a configurable policy
//! - Optional user-info profile loading
//!
//! ## Overview
//!
//! A login attempt starts with [`OidcClient::prepare_login`], which returns a
//! [`LoginState`] the caller keeps until the provider redirects back. The
//! callback is then handed to [`OidcClient::process_response`] together with
//! that state, producing a [`LoginResult`].
//!
//! Network access goes through the [`Backchannel`] trait and signing keys come
//! from a [`KeySetProvider`]; discovery and JWKS retrieval are left to the
//! caller.
//!
//! ## Modules
//!
//! - [`config`] - Client options and validation policy
//! - [`error`] - Error types for every processing step
//! - [`pkce`] - PKCE verifier and challenge
//! - [`state`] - Per-attempt login state
//! - [`authorize`] - Authorization response parsing
//! - [`backchannel`] - Server-to-server transport
//! - [`token`] - Token endpoint client and token response validation
//! - [`keys`] - Signing key sets
//! - [`id_token`] - Identity token validation
//! - [`userinfo`] - User-info endpoint client
//! - [`client`] - Login response processing

pub mod authorize;
pub mod backchannel;
pub mod client;
pub mod config;
pub mod error;
pub mod id_token;
pub mod keys;
pub mod pkce;
pub mod state;
pub mod token;
pub mod userinfo;

pub use authorize::AuthorizeResponse;
pub use backchannel::{
    Backchannel, BackchannelRequest, BackchannelResponse, HttpMethod, ReqwestBackchannel,
};
pub use client::{AuthenticatedLogin, LoginResult, OidcClient};
pub use config::{ClientAuthStyle, ClientOptions, ConfigError, Flow, Policy, ProviderEndpoints};
pub use error::{
    IdentityTokenError, LoginError, ProfileError, RedemptionError, TokenResponseError,
    TransportError,
};
pub use id_token::{
    IdentityTokenValidator, UnverifiedToken, ValidatedIdentity, access_token_hash,
};
pub use keys::{KeySet, KeySetError, KeySetProvider, StaticKeySet, VerificationKey};
pub use pkce::{PkceChallenge, PkceError, PkceVerifier};
pub use state::LoginState;
pub use token::{ExtraParameters, TokenClient, TokenResponse};
pub use userinfo::UserInfoClient;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use octofhir_oidc::prelude::*;
/// ```
pub mod prelude {
    pub use crate::backchannel::{Backchannel, ReqwestBackchannel};
    pub use crate::client::{LoginResult, OidcClient};
    pub use crate::config::{ClientOptions, Policy, ProviderEndpoints};
    pub use crate::error::LoginError;
    pub use crate::keys::{KeySet, KeySetProvider, StaticKeySet};
    pub use crate::state::LoginState;
    pub use crate::token::ExtraParameters;
}
