use axum::http::{header, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::{json, Value};

use keyrelay_types::models::credential_id;
use keyrelay_types::GatewayConfig;

use crate::router::build_router;
use crate::test_helpers::{test_app_state, TEST_KEYS};

fn admin() -> HeaderValue {
    HeaderValue::from_static("Bearer pwd")
}

#[tokio::test]
async fn test_admin_api_requires_key() {
    let (state, _tmp) = test_app_state();
    let server = TestServer::new(build_router(state)).unwrap();

    server.get("/api/status").await.assert_status(StatusCode::UNAUTHORIZED);

    let response = server.get("/api/status").add_header(header::AUTHORIZATION, admin()).await;
    response.assert_status_ok();
    let status: Value = response.json();
    assert_eq!(status["backend"], "memory");
    assert_eq!(status["credentials_total"], 2);
    assert_eq!(status["credentials_usable"], 2);
    assert_eq!(status["streaming_mode"], "fake");
    assert_eq!(status["max_attempts"], 5);
}

#[tokio::test]
async fn test_separate_admin_key() {
    let mut config = crate::test_helpers::test_config("http://127.0.0.1:9");
    config.server.admin_key = Some("admin-secret".to_string());
    let (state, _tmp) = crate::test_helpers::test_app_state_with(config);
    let server = TestServer::new(build_router(state)).unwrap();

    server
        .get("/api/credentials")
        .add_header(header::AUTHORIZATION, admin())
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    server
        .get("/api/credentials")
        .add_header(header::AUTHORIZATION, HeaderValue::from_static("Bearer admin-secret"))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_list_credentials_masks_secrets() {
    let (state, _tmp) = test_app_state();
    let server = TestServer::new(build_router(state)).unwrap();

    let response = server.get("/api/credentials").add_header(header::AUTHORIZATION, admin()).await;

    response.assert_status_ok();
    let body = response.text();
    assert!(!body.contains(TEST_KEYS[0]));
    let list: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(list.as_array().map(Vec::len), Some(2));
    assert_eq!(list[0]["masked_key"], "sk-t...0001");
    assert_eq!(list[0]["id"], credential_id(TEST_KEYS[0]));
    assert_eq!(list[0]["banned"], false);
    assert_eq!(list[0]["enabled"], true);
}

#[tokio::test]
async fn test_reload_replaces_list_and_persists() {
    let (state, tmp) = test_app_state();
    let server = TestServer::new(build_router(state.clone())).unwrap();

    let response = server
        .post("/api/credentials/reload")
        .add_header(header::AUTHORIZATION, admin())
        .json(&json!({
            "credentials": [
                TEST_KEYS[0],
                {"key": "sk-test-cccc-0003", "label": "new", "capacity_per_minute": 60}
            ]
        }))
        .await;

    response.assert_status_ok();
    let summary: Value = response.json();
    assert_eq!(summary["total"], 2);
    assert_eq!(summary["added"], 1);
    assert_eq!(summary["removed"], 1);
    assert_eq!(summary["unbanned"], 0);

    let ids: Vec<String> = state.gateway().pool.credentials().into_iter().map(|c| c.id).collect();
    assert!(ids.contains(&credential_id("sk-test-cccc-0003")));
    assert!(!ids.contains(&credential_id(TEST_KEYS[1])));

    let saved: GatewayConfig =
        serde_json::from_str(&std::fs::read_to_string(tmp.path().join("config.json")).unwrap())
            .unwrap();
    assert_eq!(saved.credentials.len(), 2);
    assert_eq!(saved.credentials[1].label.as_deref(), Some("new"));
}

#[tokio::test]
async fn test_reload_clears_bans() {
    let (state, _tmp) = test_app_state();
    let pool = &state.gateway().pool;
    let banned = pool.get(&credential_id(TEST_KEYS[1])).unwrap();
    pool.ban(&banned, "upstream returned 401".to_string()).await;
    assert!(pool.is_banned(&banned.id));

    let server = TestServer::new(build_router(state.clone())).unwrap();
    let response = server
        .post("/api/credentials/reload")
        .add_header(header::AUTHORIZATION, admin())
        .json(&json!({"credentials": TEST_KEYS, "persist": false}))
        .await;

    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["unbanned"], 1);
    assert!(!state.gateway().pool.is_banned(&banned.id));
}

#[tokio::test]
async fn test_reload_rejects_empty_key() {
    let (state, _tmp) = test_app_state();
    let server = TestServer::new(build_router(state.clone())).unwrap();

    server
        .post("/api/credentials/reload")
        .add_header(header::AUTHORIZATION, admin())
        .json(&json!({"credentials": ["sk-ok-key-0001", "  "]}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(state.gateway().pool.len(), 2);
}

#[tokio::test]
async fn test_unban_and_toggle() {
    let (state, _tmp) = test_app_state();
    let id = credential_id(TEST_KEYS[0]);
    let credential = state.gateway().pool.get(&id).unwrap();
    state.gateway().pool.ban(&credential, "manual".to_string()).await;

    let server = TestServer::new(build_router(state.clone())).unwrap();

    server
        .post("/api/credentials/unknown/unban")
        .add_header(header::AUTHORIZATION, admin())
        .await
        .assert_status(StatusCode::NOT_FOUND);

    server
        .post(&format!("/api/credentials/{}/unban", id))
        .add_header(header::AUTHORIZATION, admin())
        .await
        .assert_status_ok();
    assert!(!state.gateway().pool.is_banned(&id));

    let response = server
        .post(&format!("/api/credentials/{}/enabled", id))
        .add_header(header::AUTHORIZATION, admin())
        .json(&json!({"enabled": false}))
        .await;
    response.assert_status_ok();
    assert!(!state.gateway().pool.is_enabled(&credential));

    let status: Value =
        server.get("/api/status").add_header(header::AUTHORIZATION, admin()).await.json();
    assert_eq!(status["credentials_usable"], 1);
}

async fn reload_without_persisting(server: &TestServer, keys: Value) {
    server
        .post("/api/credentials/reload")
        .add_header(header::AUTHORIZATION, admin())
        .json(&json!({"credentials": keys, "persist": false}))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_concurrent_reloads_keep_config_and_pool_in_step() {
    let (state, _tmp) = test_app_state();
    let server = TestServer::new(build_router(state.clone())).unwrap();
    let even = json!(["sk-even-aaaa-0001", "sk-even-bbbb-0002"]);
    let odd = json!(["sk-odd-cccc-0003"]);

    tokio::join!(
        reload_without_persisting(&server, even.clone()),
        reload_without_persisting(&server, odd.clone()),
        reload_without_persisting(&server, even),
        reload_without_persisting(&server, odd),
    );

    let mut in_config: Vec<String> = state
        .gateway()
        .config
        .read()
        .await
        .resolved_credentials()
        .into_iter()
        .map(|c| c.id)
        .collect();
    let mut in_pool: Vec<String> =
        state.gateway().pool.credentials().into_iter().map(|c| c.id).collect();
    in_config.sort();
    in_pool.sort();
    assert_eq!(in_config, in_pool);
}
