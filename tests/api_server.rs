//! Protected API over HTTP, and the console client calling it

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use reqwest::{StatusCode, header};
use tokio::net::TcpListener;

use common::{CLIENT_ID, CLIENT_SECRET, MockAuthServer, SCOPE, discovery_config};
use rewards_auth::Error;
use rewards_auth::config::{ClientConfig, Config};
use rewards_auth::console::Console;
use rewards_auth::server::{REWARDS_DATA, create_router};

/// Start the rewards API against `auth` and return its base URL
async fn start_api(auth: &MockAuthServer) -> String {
    let app = create_router(Arc::new(auth.gate(Some(SCOPE))));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base
}

fn console_config(auth: &MockAuthServer, api_base_url: &str, scope: &str) -> Config {
    Config {
        client: ClientConfig {
            issuer: auth.issuer.clone(),
            client_id: CLIENT_ID.to_string(),
            client_secret: CLIENT_SECRET.to_string(),
            scopes: vec![scope.to_string()],
            api_base_url: api_base_url.to_string(),
            ..ClientConfig::default()
        },
        discovery: discovery_config(),
        ..Config::default()
    }
}

#[tokio::test]
async fn health_is_public() {
    let auth = MockAuthServer::start().await;
    let base = start_api(&auth).await;

    let response = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_token_is_challenged() {
    let auth = MockAuthServer::start().await;
    let base = start_api(&auth).await;

    let response = reqwest::get(format!("{base}/api/rewards")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    assert_eq!(response.text().await.unwrap(), "");
}

#[tokio::test]
async fn invalid_token_is_unauthorized() {
    let auth = MockAuthServer::start().await;
    let base = start_api(&auth).await;

    let response = reqwest::Client::new()
        .get(format!("{base}/api/rewards"))
        .bearer_auth("never-issued")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers()[header::WWW_AUTHENTICATE],
        r#"Bearer error="invalid_token""#
    );
}

#[tokio::test]
async fn console_call_prints_rewards() {
    let auth = MockAuthServer::start().await;
    let base = start_api(&auth).await;
    let console = Console::new(&console_config(&auth, &base, SCOPE)).unwrap();

    let mut out = Vec::new();
    console.call(&mut out).await.unwrap();

    let printed = String::from_utf8(out).unwrap();
    assert!(printed.contains(r#""access_token": "abc123""#), "{printed}");
    assert!(printed.trim_end().ends_with(&format!("\"{REWARDS_DATA}\"")), "{printed}");
}

#[tokio::test]
async fn console_call_with_wrong_scope_is_forbidden() {
    let auth = MockAuthServer::start().await;
    let base = start_api(&auth).await;
    let console = Console::new(&console_config(&auth, &base, "other.scope")).unwrap();

    let mut out = Vec::new();
    let err = console.call(&mut out).await.unwrap_err();

    assert!(matches!(err, Error::Api(403)));
    assert!(String::from_utf8(out).unwrap().trim_end().ends_with("403"));
}

#[tokio::test]
async fn console_discover_prints_document() {
    let auth = MockAuthServer::start().await;
    let console = Console::new(&console_config(&auth, "http://unused", SCOPE)).unwrap();

    let mut out = Vec::new();
    console.discover(&mut out).await.unwrap();

    let doc: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(doc["issuer"], auth.issuer.as_str());
    assert_eq!(auth.hits().token(), 0);
}

#[tokio::test]
async fn console_token_with_bad_secret_fails() {
    let auth = MockAuthServer::start().await;
    let mut config = console_config(&auth, "http://unused", SCOPE);
    config.client.client_secret = "wrong".to_string();
    let console = Console::new(&config).unwrap();

    let mut out = Vec::new();
    let err = console.token(&mut out).await.unwrap_err();
    assert!(matches!(err, Error::Token(_)));
    assert!(out.is_empty());
}
