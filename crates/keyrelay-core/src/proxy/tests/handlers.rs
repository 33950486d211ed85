#![allow(clippy::unwrap_used)]

use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum_test::{TestResponse, TestServer};
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, header as match_header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use keyrelay_types::{CredentialConfig, GatewayConfig, MaxTokensMode, StreamingMode};

use crate::proxy::server::{build_proxy_router, AppState};
use crate::proxy::upstream::{build_http_client, UpstreamClient, UpstreamTransport};
use crate::store::{MemoryStore, StateStore};

const KEY_A: &str = "sk-key-aaaa-0001";
const KEY_B: &str = "sk-key-bbbb-0002";

fn test_config(upstream: &MockServer, keys: &[&str]) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.upstream.endpoint = format!("{}/v1/chat/completions", upstream.uri());
    config.credentials = keys.iter().map(|k| CredentialConfig::new(*k)).collect();
    config.retry.interval_ms = 10;
    config
}

fn test_state(config: GatewayConfig) -> AppState {
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let transport: Arc<dyn UpstreamTransport> =
        Arc::new(UpstreamClient::new(build_http_client(5, None).unwrap(), &config.upstream));
    AppState::new(config, store, transport)
}

fn bearer(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {}", token)).unwrap()
}

async fn post_chat(server: &TestServer, body: Value) -> TestResponse {
    server
        .post("/v1/chat/completions")
        .add_header(header::AUTHORIZATION, bearer("pwd"))
        .json(&body)
        .await
}

fn completion_body(content: &str) -> Value {
    json!({
        "id": "up-123",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 9, "completion_tokens": 3}
    })
}

fn chat_request(stream: bool) -> Value {
    json!({
        "model": "gpt-5",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": stream
    })
}

#[tokio::test]
async fn test_health_needs_no_auth() {
    let upstream = MockServer::start().await;
    let server = TestServer::new(build_proxy_router(test_state(test_config(&upstream, &[])))).unwrap();

    let response = server.get("/health").await;

    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["status"], "ok");
}

#[tokio::test]
async fn test_models_requires_api_key() {
    let upstream = MockServer::start().await;
    let server = TestServer::new(build_proxy_router(test_state(test_config(&upstream, &[])))).unwrap();

    let denied = server.get("/v1/models").await;
    denied.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(denied.json::<Value>()["error"]["code"], "invalid_api_key");

    let wrong = server.get("/v1/models").add_header(header::AUTHORIZATION, bearer("nope")).await;
    wrong.assert_status(StatusCode::UNAUTHORIZED);

    let allowed = server
        .get("/v1/models")
        .add_header(HeaderName::from_static("x-api-key"), HeaderValue::from_static("pwd"))
        .await;
    allowed.assert_status_ok();
    let json: Value = allowed.json();
    assert_eq!(json["object"], "list");
    let ids: Vec<&str> = json["data"].as_array().unwrap().iter().filter_map(|m| m["id"].as_str()).collect();
    assert!(ids.contains(&"gpt-5"));
    assert!(json["data"][0]["created"].is_number());
}

#[tokio::test]
async fn test_chat_completion_json() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(match_header("authorization", KEY_A))
        .and(body_partial_json(json!({"model": "gpt-5", "messages": [{"role": "user", "content": "hi"}]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("hello")))
        .expect(1)
        .mount(&upstream)
        .await;

    let state = test_state(test_config(&upstream, &[KEY_A]));
    let server = TestServer::new(build_proxy_router(state.clone())).unwrap();

    let response = post_chat(&server, chat_request(false)).await;

    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["object"], "chat.completion");
    assert_eq!(json["model"], "gpt-5");
    assert_eq!(json["choices"][0]["message"]["content"], "hello");
    assert_eq!(json["usage"]["total_tokens"], 12);
    assert_eq!(response.header("x-keyrelay-attempts"), "1");

    let today = state.usage.today().await.unwrap();
    assert_eq!(today.len(), 1);
    assert_eq!(today[0].success_count, 1);
    assert_eq!(today[0].prompt_tokens, 9);
}

#[tokio::test]
async fn test_max_tokens_mode_rewrites_budget() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"model": "claude-4.5-sonnet-20250929", "max_tokens": 4096})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
        .expect(1)
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"model": "gpt-5", "max_tokens": 8192})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
        .expect(1)
        .mount(&upstream)
        .await;

    let mut config = test_config(&upstream, &[KEY_A]);
    config.upstream.max_tokens_mode = MaxTokensMode::Medium;
    config.upstream.model_limits.insert("claude-4.5-sonnet".to_string(), 8192);
    let server = TestServer::new(build_proxy_router(test_state(config))).unwrap();

    let mut request = chat_request(false);
    request["max_tokens"] = json!(100);
    post_chat(&server, request).await.assert_status_ok();

    let mut request = chat_request(false);
    request["model"] = json!("claude-4.5-sonnet-20250929");
    post_chat(&server, request).await.assert_status_ok();
}

#[tokio::test]
async fn test_chat_fails_over_throttled_key() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(match_header("authorization", KEY_A))
        .respond_with(
            ResponseTemplate::new(429).set_body_json(json!({"error": {"message": "Too many requests"}})),
        )
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(match_header("authorization", KEY_B))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("from b")))
        .mount(&upstream)
        .await;

    let state = test_state(test_config(&upstream, &[KEY_A, KEY_B]));
    let server = TestServer::new(build_proxy_router(state)).unwrap();

    let response = post_chat(&server, chat_request(false)).await;

    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["choices"][0]["message"]["content"], "from b");
    assert_eq!(response.header("x-keyrelay-key"), "sk-k...0002");
}

#[tokio::test]
async fn test_chat_all_keys_throttled_is_rate_limit_error() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .expect(2)
        .mount(&upstream)
        .await;

    let state = test_state(test_config(&upstream, &[KEY_A, KEY_B]));
    let server = TestServer::new(build_proxy_router(state.clone())).unwrap();

    let response = post_chat(&server, chat_request(false)).await;

    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.json::<Value>()["error"]["type"], "rate_limit_error");

    let today = state.usage.today().await.unwrap();
    assert_eq!(today[0].failure_count, 1);
}

#[tokio::test]
async fn test_chat_fatal_upstream_error_passes_through() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(
            json!({"error": {"message": "context length exceeded", "type": "invalid_request_error"}}),
        ))
        .expect(1)
        .mount(&upstream)
        .await;

    let server =
        TestServer::new(build_proxy_router(test_state(test_config(&upstream, &[KEY_A, KEY_B]))))
            .unwrap();

    let response = post_chat(&server, chat_request(false)).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"]["message"], "context length exceeded");
}

#[tokio::test]
async fn test_chat_rejects_invalid_body() {
    let upstream = MockServer::start().await;
    let server = TestServer::new(build_proxy_router(test_state(test_config(&upstream, &[KEY_A])))).unwrap();

    let missing_messages = post_chat(&server, json!({"model": "gpt-5", "messages": []})).await;
    missing_messages.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(missing_messages.json::<Value>()["error"]["type"], "invalid_request_error");

    let not_an_object = post_chat(&server, json!(["nope"])).await;
    not_an_object.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_no_credentials_is_rate_limit_error() {
    let upstream = MockServer::start().await;
    let server = TestServer::new(build_proxy_router(test_state(test_config(&upstream, &[])))).unwrap();

    let response = post_chat(&server, chat_request(false)).await;

    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.json::<Value>()["error"]["code"], "no_usable_key");
}

/// Payloads of the `data:` frames in an SSE body.
fn sse_payloads(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_fake_stream_by_default() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("streamed")))
        .expect(1)
        .mount(&upstream)
        .await;

    let server = TestServer::new(build_proxy_router(test_state(test_config(&upstream, &[KEY_A])))).unwrap();

    let response = post_chat(&server, chat_request(true)).await;

    response.assert_status_ok();
    assert_eq!(response.header("content-type"), "text/event-stream");
    let payloads = sse_payloads(&response.text());
    assert_eq!(payloads.last().map(String::as_str), Some("[DONE]"));
    let content: Value = serde_json::from_str(&payloads[0]).unwrap();
    assert_eq!(content["object"], "chat.completion.chunk");
    assert_eq!(content["choices"][0]["delta"]["content"], "streamed");
}

#[tokio::test]
async fn test_fake_stream_failure_emits_error_frame() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&upstream)
        .await;

    let server = TestServer::new(build_proxy_router(test_state(test_config(&upstream, &[KEY_A])))).unwrap();

    let response = post_chat(&server, chat_request(true)).await;

    // Stream already opened, the failure travels in-band
    response.assert_status_ok();
    let payloads = sse_payloads(&response.text());
    assert_eq!(payloads.len(), 2);
    let error: Value = serde_json::from_str(&payloads[0]).unwrap();
    assert_eq!(error["error"]["type"], "rate_limit_error");
    assert_eq!(payloads[1], "[DONE]");
}

#[tokio::test]
async fn test_real_stream_relays_upstream_sse() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200).insert_header("content-type", "text/event-stream").set_body_string(
                "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n\
                 data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":2,\"completion_tokens\":2}}\n\n\
                 data: [DONE]\n\n",
            ),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let mut config = test_config(&upstream, &[KEY_A]);
    config.streaming.mode = StreamingMode::Real;
    let state = test_state(config);
    let server = TestServer::new(build_proxy_router(state.clone())).unwrap();

    let response = post_chat(&server, chat_request(true)).await;

    response.assert_status_ok();
    let payloads = sse_payloads(&response.text());
    assert_eq!(payloads.len(), 3);
    let first: Value = serde_json::from_str(&payloads[0]).unwrap();
    assert_eq!(first["model"], "gpt-5");
    assert_eq!(first["choices"][0]["delta"]["content"], "Hel");
    assert_eq!(payloads[2], "[DONE]");

    let today = state.usage.today().await.unwrap();
    assert_eq!(today[0].success_count, 1);
    assert_eq!(today[0].completion_tokens, 2);
}

#[tokio::test]
async fn test_fake_stream_prefix_overrides_real_mode() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"model": "gpt-5"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("forced")))
        .expect(1)
        .mount(&upstream)
        .await;

    let mut config = test_config(&upstream, &[KEY_A]);
    config.streaming.mode = StreamingMode::Real;
    let server = TestServer::new(build_proxy_router(test_state(config))).unwrap();

    let mut request = chat_request(true);
    request["model"] = json!("fake-stream/gpt-5");
    let response = post_chat(&server, request).await;

    response.assert_status_ok();
    let payloads = sse_payloads(&response.text());
    let content: Value = serde_json::from_str(&payloads[0]).unwrap();
    assert_eq!(content["model"], "gpt-5");
    assert_eq!(content["choices"][0]["delta"]["content"], "forced");
}
