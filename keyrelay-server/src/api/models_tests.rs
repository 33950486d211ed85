use axum::http::{header, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::{json, Value};
use wiremock::matchers::{header as match_header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::router::build_router;
use crate::test_helpers::{test_app_state, test_app_state_with, test_config, TEST_KEYS};

fn admin() -> HeaderValue {
    HeaderValue::from_static("Bearer pwd")
}

fn model_ids(list: &Value) -> Vec<String> {
    list["data"]
        .as_array()
        .map(|data| data.iter().filter_map(|m| m["id"].as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_update_models_feeds_v1_models() {
    let (state, tmp) = test_app_state();
    let server = TestServer::new(build_router(state)).unwrap();

    let defaults: Value = server.get("/api/models").add_header(header::AUTHORIZATION, admin()).await.json();
    assert!(defaults["models"].as_array().is_some_and(|m| !m.is_empty()));

    let response = server
        .put("/api/models")
        .add_header(header::AUTHORIZATION, admin())
        .json(&json!({"models": [" gpt-5 ", "gpt-5", "claude-sonnet-4"]}))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["models"], json!(["gpt-5", "claude-sonnet-4"]));

    let listed: Value = server.get("/v1/models").add_header(header::AUTHORIZATION, admin()).await.json();
    assert_eq!(model_ids(&listed), vec!["gpt-5".to_string(), "claude-sonnet-4".to_string()]);

    assert!(tmp.path().join("config.json").exists());
}

#[tokio::test]
async fn test_update_models_rejects_empty_list() {
    let (state, _tmp) = test_app_state();
    let server = TestServer::new(build_router(state)).unwrap();

    server
        .put("/api/models")
        .add_header(header::AUTHORIZATION, admin())
        .json(&json!({"models": ["  "]}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_refresh_models_from_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(match_header("authorization", TEST_KEYS[0]))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [{"id": "gpt-5"}, {"id": "gemini-2.5-pro"}]
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let (state, _tmp) = test_app_state_with(test_config(&upstream.uri()));
    let server = TestServer::new(build_router(state.clone())).unwrap();

    let response =
        server.post("/api/models/refresh").add_header(header::AUTHORIZATION, admin()).await;

    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["models"], json!(["gpt-5", "gemini-2.5-pro"]));
    assert_eq!(
        state.gateway().config.read().await.upstream.models,
        vec!["gpt-5".to_string(), "gemini-2.5-pro".to_string()]
    );
}

#[tokio::test]
async fn test_refresh_models_upstream_failure() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&upstream)
        .await;

    let (state, _tmp) = test_app_state_with(test_config(&upstream.uri()));
    let before = state.gateway().config.read().await.upstream.models.clone();
    let server = TestServer::new(build_router(state.clone())).unwrap();

    server
        .post("/api/models/refresh")
        .add_header(header::AUTHORIZATION, admin())
        .await
        .assert_status(StatusCode::BAD_GATEWAY);
    assert_eq!(state.gateway().config.read().await.upstream.models, before);
}

#[tokio::test]
async fn test_refresh_models_without_credentials() {
    let mut config = test_config("http://127.0.0.1:9");
    config.credentials.clear();
    let (state, _tmp) = test_app_state_with(config);
    let server = TestServer::new(build_router(state)).unwrap();

    server
        .post("/api/models/refresh")
        .add_header(header::AUTHORIZATION, admin())
        .await
        .assert_status(StatusCode::CONFLICT);
}
