//! Reqwest backchannel against a mock provider.

mod common;

use std::sync::Arc;
use std::time::Duration;

use octofhir_oidc::{
    Backchannel, BackchannelRequest, LoginState, OidcClient, Policy, ProviderEndpoints,
    ReqwestBackchannel, StaticKeySet, TransportError,
};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{REDIRECT_URI, hmac_keys, sign, token_body};

fn backchannel() -> ReqwestBackchannel {
    ReqwestBackchannel::new(Duration::from_secs(5)).unwrap()
}

fn endpoint(server: &MockServer, path: &str) -> Url {
    Url::parse(&format!("{}{}", server.uri(), path)).unwrap()
}

#[tokio::test]
async fn test_post_form() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string("grant_type=authorization_code&code=a+b"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "t"})))
        .expect(1)
        .mount(&server)
        .await;

    let request = BackchannelRequest::post_form(
        endpoint(&server, "/token"),
        vec![
            ("grant_type".into(), "authorization_code".into()),
            ("code".into(), "a b".into()),
        ],
    );

    let response = backchannel().send(request).await.unwrap();
    assert_eq!(response.status, 200);
    assert!(response.is_success());
    assert!(response.body.contains("\"access_token\""));
}

#[tokio::test]
async fn test_get_with_headers() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", "Bearer token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sub": "alice"})))
        .expect(1)
        .mount(&server)
        .await;

    let request = BackchannelRequest::get(endpoint(&server, "/userinfo"))
        .with_header("Authorization", "Bearer token");

    let response = backchannel().send(request).await.unwrap();
    assert_eq!(response.body, r#"{"sub":"alice"}"#);
}

#[tokio::test]
async fn test_error_status_is_a_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .mount(&server)
        .await;

    let request = BackchannelRequest::post_form(endpoint(&server, "/token"), Vec::new());

    let response = backchannel().send(request).await.unwrap();
    assert_eq!(response.status, 400);
    assert!(!response.is_success());
    assert_eq!(response.body, "bad request");
}

#[tokio::test]
async fn test_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let backchannel = ReqwestBackchannel::new(Duration::from_millis(100)).unwrap();
    let err = backchannel
        .send(BackchannelRequest::get(endpoint(&server, "/slow")))
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Timeout));
}

#[tokio::test]
async fn test_connection_refused() {
    // Nothing listens on port 1.
    let url = Url::parse("http://127.0.0.1:1/token").unwrap();

    let err = backchannel()
        .send(BackchannelRequest::get(url))
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Network(_)));
}

#[tokio::test]
async fn test_login_against_mock_provider() {
    let server = MockServer::start().await;
    let issuer = server.uri();

    let mut claims = common::claims("n1", "token");
    claims["iss"] = json!(issuer);

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("code=bar"))
        .and(body_string_contains("client_id=client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("token", &sign(&claims))))
        .expect(1)
        .mount(&server)
        .await;

    let options = common::options()
        .with_allow_http(true)
        .with_policy(Policy::default().with_algorithms(["HS256"]));
    let options = octofhir_oidc::ClientOptions {
        provider: ProviderEndpoints::new(issuer.clone(), format!("{issuer}/token")),
        ..options
    };

    let client =
        OidcClient::with_reqwest(options, Arc::new(StaticKeySet::new(hmac_keys()))).unwrap();
    let login = LoginState::new("s1", "n1", REDIRECT_URI);

    let result = client
        .process_response(&format!("{REDIRECT_URI}?state=s1&code=bar"), &login)
        .await;

    assert!(!result.is_error(), "{:?}", result.error_message());
    assert_eq!(result.access_token(), Some("token"));
    assert_eq!(result.identity().unwrap().issuer, issuer);
}
