use axum::http::{header, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::{json, Value};

use keyrelay_types::models::credential_id;

use crate::router::build_router;
use crate::test_helpers::{test_app_state, TEST_KEYS};

fn admin() -> HeaderValue {
    HeaderValue::from_static("Bearer pwd")
}

#[tokio::test]
async fn test_record_usage_accumulates() {
    let (state, _tmp) = test_app_state();
    let server = TestServer::new(build_router(state.clone())).unwrap();

    let first = server
        .post("/api/usage/record")
        .add_header(header::AUTHORIZATION, admin())
        .json(&json!({"model": "gpt-5", "success": true, "prompt_tokens": 10, "completion_tokens": 4}))
        .await;
    first.assert_status_ok();
    assert_eq!(first.json::<Value>()["success_count"], 1);

    let second: Value = server
        .post("/api/usage/record")
        .add_header(header::AUTHORIZATION, admin())
        .json(&json!({"model": "gpt-5", "success": false}))
        .await
        .json();
    assert_eq!(second["success_count"], 1);
    assert_eq!(second["failure_count"], 1);
    assert_eq!(second["prompt_tokens"], 10);

    let report: Value = server.get("/api/usage").add_header(header::AUTHORIZATION, admin()).await.json();
    assert_eq!(report["total_success"], 1);
    assert_eq!(report["total_failure"], 1);
    assert_eq!(report["records"][0]["model"], "gpt-5");
    assert!(report["next_reset_at"].as_i64().unwrap() > chrono::Utc::now().timestamp());

    let today = state.gateway().usage.today().await.unwrap();
    assert_eq!(today[0].total_calls(), 2);
}

#[tokio::test]
async fn test_record_usage_requires_model() {
    let (state, _tmp) = test_app_state();
    let server = TestServer::new(build_router(state)).unwrap();

    server
        .post("/api/usage/record")
        .add_header(header::AUTHORIZATION, admin())
        .json(&json!({"model": " ", "success": true}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_usage_for_other_day() {
    let (state, _tmp) = test_app_state();
    let server = TestServer::new(build_router(state)).unwrap();

    server
        .post("/api/usage/record")
        .add_header(header::AUTHORIZATION, admin())
        .json(&json!({"model": "gpt-5", "success": true}))
        .await
        .assert_status_ok();

    let past: Value = server
        .get("/api/usage")
        .add_query_param("date", "2020-01-01")
        .add_header(header::AUTHORIZATION, admin())
        .await
        .json();
    assert_eq!(past["date"], "2020-01-01");
    assert_eq!(past["records"].as_array().map(Vec::len), Some(0));

    server
        .get("/api/usage")
        .add_query_param("date", "yesterday")
        .add_header(header::AUTHORIZATION, admin())
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rate_limit_snapshot() {
    let (state, _tmp) = test_app_state();
    let server = TestServer::new(build_router(state.clone())).unwrap();

    let response = server.get("/api/rate-limits").add_header(header::AUTHORIZATION, admin()).await;

    response.assert_status_ok();
    let snapshots: Value = response.json();
    assert_eq!(snapshots.as_array().map(Vec::len), Some(2));
    assert_eq!(snapshots[0]["limit"], 30);
    assert_eq!(snapshots[0]["used"], 0);
    assert_eq!(snapshots[0]["remaining"], 30);
    assert_eq!(snapshots[0]["banned"], false);

    server
        .delete(&format!("/api/rate-limits/{}", credential_id(TEST_KEYS[0])))
        .add_header(header::AUTHORIZATION, admin())
        .await
        .assert_status_ok();
    server
        .delete("/api/rate-limits/unknown")
        .add_header(header::AUTHORIZATION, admin())
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_api_path() {
    let (state, _tmp) = test_app_state();
    let server = TestServer::new(build_router(state)).unwrap();

    server
        .get("/api/nope")
        .add_header(header::AUTHORIZATION, admin())
        .await
        .assert_status(StatusCode::NOT_FOUND);
}
