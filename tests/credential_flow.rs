//! Credential acquisition against a mock token endpoint.

use std::net::SocketAddr;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use serde_json::json;

use tablescribe::core::session::{SessionStatus, TranscriptionSession, fetch_credential};
use tablescribe::{VoiceConfig, VoiceError};

/// Serve `response` from a throwaway token endpoint; returns its address.
async fn spawn_token_endpoint(
    status: StatusCode,
    body: String,
) -> SocketAddr {
    let app = Router::new().route(
        "/token",
        get(move || {
            let body = body.clone();
            async move { (status, body) }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn config_for(addr: SocketAddr) -> VoiceConfig {
    VoiceConfig {
        token_endpoint: format!("http://{addr}/token"),
        ..VoiceConfig::default()
    }
}

#[tokio::test]
async fn token_response_yields_token_credential() {
    let addr = spawn_token_endpoint(
        StatusCode::OK,
        json!({"token": "tok_abc"}).to_string(),
    )
    .await;

    let http = reqwest::Client::new();
    let credential = fetch_credential(&http, &format!("http://{addr}/token"))
        .await
        .unwrap();

    assert!(matches!(
        credential,
        tablescribe::core::session::SessionCredential::Token(token) if token == "tok_abc"
    ));
}

#[tokio::test]
async fn access_token_response_is_accepted() {
    let addr = spawn_token_endpoint(
        StatusCode::OK,
        json!({"access_token": "tok_alt"}).to_string(),
    )
    .await;

    let http = reqwest::Client::new();
    let credential = fetch_credential(&http, &format!("http://{addr}/token"))
        .await
        .unwrap();

    assert!(matches!(
        credential,
        tablescribe::core::session::SessionCredential::Token(token) if token == "tok_alt"
    ));
}

#[tokio::test]
async fn rate_limited_start_fails_specifically_and_lands_in_error() {
    let addr = spawn_token_endpoint(
        StatusCode::TOO_MANY_REQUESTS,
        "slow down".to_string(),
    )
    .await;

    let mut session = TranscriptionSession::new(config_for(addr));
    let err = session.start().await.unwrap_err();

    assert!(matches!(err, VoiceError::RateLimited(_)));
    assert!(err.to_string().contains("slow down"));
    assert_eq!(session.status(), SessionStatus::Error);
    assert!(session.error_message().is_some());
}

#[tokio::test]
async fn server_error_carries_response_body() {
    let addr = spawn_token_endpoint(
        StatusCode::INTERNAL_SERVER_ERROR,
        "issuer exploded".to_string(),
    )
    .await;

    let mut session = TranscriptionSession::new(config_for(addr));
    let err = session.start().await.unwrap_err();

    assert!(matches!(err, VoiceError::Credential(_)));
    assert!(err.to_string().contains("500"));
    assert!(err.to_string().contains("issuer exploded"));
    assert_eq!(session.status(), SessionStatus::Error);
}

#[tokio::test]
async fn useless_token_body_is_a_credential_error() {
    let addr = spawn_token_endpoint(StatusCode::OK, json!({"ok": true}).to_string()).await;

    let mut session = TranscriptionSession::new(config_for(addr));
    let err = session.start().await.unwrap_err();

    assert!(matches!(err, VoiceError::Credential(_)));
    assert_eq!(session.status(), SessionStatus::Error);
}

#[tokio::test]
async fn unreachable_endpoint_is_a_credential_error() {
    // Port 9 on localhost is almost certainly closed.
    let config = VoiceConfig {
        token_endpoint: "http://127.0.0.1:9/token".to_string(),
        ..VoiceConfig::default()
    };

    let mut session = TranscriptionSession::new(config);
    let err = session.start().await.unwrap_err();
    assert!(matches!(err, VoiceError::Credential(_)));
}
