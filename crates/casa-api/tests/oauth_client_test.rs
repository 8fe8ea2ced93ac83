#![allow(clippy::unwrap_used)]
// Integration tests for `OAuthClient` using wiremock.

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use casa_api::{Error, OAuthClient};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, OAuthClient) {
    let server = MockServer::start().await;
    let client = OAuthClient::with_client(
        reqwest::Client::new(),
        Url::parse(&server.uri()).unwrap(),
        "https://dash.example.com/".into(),
        Url::parse("https://dash.example.com/").unwrap(),
    );
    (server, client)
}

// ── Authorization code grant ────────────────────────────────────────

#[tokio::test]
async fn test_exchange_code_success() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=abc"))
        .and(body_string_contains("client_id=https%3A%2F%2Fdash.example.com%2F"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "expires_in": 1800,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tokens = client.exchange_code("abc").await.unwrap();

    assert_eq!(tokens.access_token.expose_secret(), "access-1");
    assert_eq!(
        tokens.refresh_token.as_ref().map(ExposeSecret::expose_secret),
        Some("refresh-1")
    );
    assert_eq!(tokens.expires_in, 1800);
    assert_eq!(tokens.token_type.as_deref(), Some("Bearer"));
}

#[tokio::test]
async fn test_exchange_code_rejected() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_request" })),
        )
        .mount(&server)
        .await;

    let result = client.exchange_code("stale").await;

    match result {
        Err(Error::TokenExchange { status, body }) => {
            assert_eq!(status, 400);
            assert!(body.contains("invalid_request"));
        }
        other => panic!("expected TokenExchange error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_exchange_code_malformed_body() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let result = client.exchange_code("abc").await;
    assert!(
        matches!(result, Err(Error::Deserialization { .. })),
        "expected Deserialization error, got: {result:?}"
    );
}

// ── Refresh token grant ─────────────────────────────────────────────

#[tokio::test]
async fn test_refresh_without_rotation() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-2",
            "expires_in": 1800,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let refresh = SecretString::from("refresh-1".to_string());
    let tokens = client.refresh(&refresh).await.unwrap();

    assert_eq!(tokens.access_token.expose_secret(), "access-2");
    assert!(tokens.refresh_token.is_none());
}

#[tokio::test]
async fn test_refresh_revoked() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
        .mount(&server)
        .await;

    let refresh = SecretString::from("revoked".to_string());
    let err = client.refresh(&refresh).await.unwrap_err();
    assert!(err.is_auth_expired());
}
