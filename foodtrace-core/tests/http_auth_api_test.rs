mod common;

use common::{credentials, init_test_tracing};
use foodtrace_core::api::{ApiClient, AuthEndpoints, ClientConfig};
use foodtrace_core::auth::{AuthApi, HttpAuthApi, ProfileUpdate};
use foodtrace_core::config::{Settings, StorageBackendKind};
use foodtrace_core::context::AppContext;
use foodtrace_core::error::ErrorType;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn session_body(token: &str, refresh_token: &str) -> Value {
    json!({
        "user": {
            "id": "u-1",
            "username": "a",
            "role": "inspector",
            "permissions": [{ "resource": "batches", "action": "read" }]
        },
        "token": token,
        "refreshToken": refresh_token,
        "expiresIn": 3600,
        "features": ["ai_analysis"]
    })
}

fn http_api(server: &MockServer) -> HttpAuthApi {
    let client = ApiClient::new(
        ClientConfig::new(server.uri())
            .timeout(Duration::from_secs(2))
            .retry_delay(Duration::from_millis(10)),
    )
    .unwrap();
    HttpAuthApi::new(Arc::new(client), AuthEndpoints::default())
}

#[tokio::test]
async fn test_login_posts_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({"username": "a", "password": "b"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body("t1", "r1")))
        .expect(1)
        .mount(&server)
        .await;

    let response = http_api(&server).login(&credentials()).await.unwrap();
    assert_eq!(response.token, "t1");
    assert_eq!(response.refresh_token, "r1");
    assert_eq!(response.expires_in, 3600);
    assert!(response.permissions.is_none());
    assert_eq!(response.user.permissions.len(), 1);
}

#[tokio::test]
async fn test_login_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let err = http_api(&server).login(&credentials()).await.unwrap_err();
    assert_eq!(err.error_type, ErrorType::ServerError);
}

#[tokio::test]
async fn test_refresh_sends_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({"refreshToken": "r1"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"token": "t2", "expiresIn": 900})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let response = http_api(&server).refresh_token("r1").await.unwrap();
    assert_eq!(response.token, "t2");
    assert_eq!(response.refresh_token, None);
    assert_eq!(response.expires_in, 900);
}

#[tokio::test]
async fn test_logout_accepts_any_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(200).set_body_string("bye"))
        .expect(1)
        .mount(&server)
        .await;

    http_api(&server).logout().await.unwrap();
}

#[tokio::test]
async fn test_profile_update_patches() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/auth/profile"))
        .and(body_json(json!({"displayName": "Head Inspector"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u-1",
            "username": "a",
            "displayName": "Head Inspector"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let user = http_api(&server)
        .update_profile(&ProfileUpdate {
            display_name: Some("Head Inspector".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(user.display_name.as_deref(), Some("Head Inspector"));
    assert_eq!(user.role, "");
}

#[tokio::test]
async fn test_context_session_drives_client_token() {
    init_test_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_body("t1", "r1")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/batches"))
        .and(header("authorization", "Bearer t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "B-1"}])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .and(header("authorization", "Bearer t1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut settings = Settings::default();
    settings.api.base_url = server.uri();
    settings.storage.backend = StorageBackendKind::Memory;
    let ctx = AppContext::create(settings, None).await.unwrap();

    ctx.auth().login(credentials()).await.unwrap();
    assert!(ctx.auth().has_permission("batches", "read"));
    assert_eq!(ctx.api().auth_token().as_deref(), Some("t1"));

    let batches_path = ctx.settings().api.endpoints.batches.list();
    let batches: Vec<Value> = ctx.api().get(&batches_path).await.unwrap();
    assert_eq!(batches.len(), 1);

    ctx.auth().logout().await;
    assert_eq!(ctx.api().auth_token(), None);

    ctx.destroy().await;
}
