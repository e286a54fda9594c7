//! Backchannel transport.
//!
//! The client never opens sockets itself. Every server-to-server call goes
//! through a [`Backchannel`], which must be safe to share between concurrent
//! login attempts. [`ReqwestBackchannel`] is the default implementation.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::TransportError;

/// HTTP method of a backchannel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to send over the backchannel.
#[derive(Debug, Clone)]
pub struct BackchannelRequest {
    pub method: HttpMethod,
    pub url: Url,
    /// Form fields in send order. Empty for requests without a body.
    pub form: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl BackchannelRequest {
    /// Creates a form-encoded POST request.
    #[must_use]
    pub fn post_form(url: Url, form: Vec<(String, String)>) -> Self {
        Self {
            method: HttpMethod::Post,
            url,
            form,
            headers: Vec::new(),
        }
    }

    /// Creates a GET request.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            form: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Returns the `application/x-www-form-urlencoded` body.
    #[must_use]
    pub fn form_body(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.form.iter())
            .finish()
    }

    /// Returns the first form field named `name`.
    #[must_use]
    pub fn form_value(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Returns the first header named `name`, ignoring case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A response received over the backchannel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackchannelResponse {
    pub status: u16,
    pub body: String,
}

impl BackchannelResponse {
    #[must_use]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Server-to-server transport.
///
/// Implementations report transport-level failures only. Non-success statuses
/// are returned as responses and interpreted by the caller.
#[async_trait]
pub trait Backchannel: Send + Sync {
    /// Sends a request and returns the response.
    async fn send(&self, request: BackchannelRequest) -> Result<BackchannelResponse, TransportError>;
}

/// [`Backchannel`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestBackchannel {
    http_client: reqwest::Client,
}

impl ReqwestBackchannel {
    /// Creates a backchannel whose client enforces `timeout` per request.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidRequest` if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                TransportError::InvalidRequest(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { http_client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn from_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl Backchannel for ReqwestBackchannel {
    async fn send(&self, request: BackchannelRequest) -> Result<BackchannelResponse, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.http_client.get(request.url.as_str()),
            HttpMethod::Post => self
                .http_client
                .post(request.url.as_str())
                .header(
                    reqwest::header::CONTENT_TYPE,
                    "application/x-www-form-urlencoded",
                )
                .body(request.form_body()),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;

        tracing::debug!(
            method = %request.method,
            url = %request.url,
            status,
            "Backchannel request completed"
        );

        Ok(BackchannelResponse { status, body })
    }
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_builder() {
        TransportError::InvalidRequest(error.to_string())
    } else {
        TransportError::Network(error.to_string())
    }
}
