mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use common::{body_json, build_test_app, get, memory_bus};
use renamer_core::job_events::ProgressEventType;
use renamer_events::ProgressBus;
use serde_json::json;
use tower::ServiceExt;

#[tokio::test]
async fn health_check_returns_ok_with_version() {
    let response = get(build_test_app(memory_bus()), "/health").await;
    assert_eq!(response.status(), StatusCode::OK);

    let request_id = response.headers().get("x-request-id").cloned();
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(request_id.unwrap().to_str().unwrap().len(), 36);
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let response = get(build_test_app(memory_bus()), "/nope").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn progress_returns_history_oldest_first() {
    let bus = memory_bus();
    bus.publish("jr_1", ProgressEventType::JobStarted, json!({"total_files": 2}))
        .await;
    bus.publish("jr_1", ProgressEventType::ItemProcessing, json!({"index": 0}))
        .await;
    bus.publish("other", ProgressEventType::JobStarted, json!({})).await;

    let response = get(build_test_app(bus), "/api/v1/jobs/jr_1/progress").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["job_id"], "jr_1");
    assert_eq!(json["count"], 2);
    assert_eq!(json["updates"][0]["type"], "job_started");
    assert_eq!(json["updates"][0]["total_files"], 2);
    assert_eq!(json["updates"][1]["type"], "item_processing");
}

#[tokio::test]
async fn progress_limit_keeps_the_newest_events() {
    let bus = memory_bus();
    for i in 0..5 {
        bus.publish("j", ProgressEventType::ItemProcessing, json!({"index": i}))
            .await;
    }

    let json = body_json(get(build_test_app(bus), "/api/v1/jobs/j/progress?limit=2").await).await;
    assert_eq!(json["count"], 2);
    assert_eq!(json["updates"][0]["index"], 3);
    assert_eq!(json["updates"][1]["index"], 4);
}

#[tokio::test]
async fn unknown_job_has_empty_history() {
    let json = body_json(get(build_test_app(memory_bus()), "/api/v1/jobs/ghost/progress").await).await;
    assert_eq!(json["count"], 0);
    assert_eq!(json["updates"], json!([]));
}

#[tokio::test]
async fn history_is_empty_without_a_store() {
    let bus = Arc::new(ProgressBus::live_only());
    bus.publish("j", ProgressEventType::JobStarted, json!({})).await;

    let json = body_json(get(build_test_app(bus), "/api/v1/jobs/j/progress").await).await;
    assert_eq!(json["count"], 0);
}

#[tokio::test]
async fn out_of_range_limit_is_rejected() {
    let response = get(build_test_app(memory_bus()), "/api/v1/jobs/j/progress?limit=0").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");

    let response = get(build_test_app(memory_bus()), "/api/v1/jobs/j/progress?limit=501").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_job_id_is_rejected() {
    let response = get(build_test_app(memory_bus()), "/api/v1/jobs/bad%20id/progress").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cors_preflight_allows_configured_origin() {
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/v1/jobs/j/progress")
        .header("Origin", "http://localhost:3000")
        .header("Access-Control-Request-Method", "GET")
        .body(Body::empty())
        .unwrap();

    let response = build_test_app(memory_bus()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "http://localhost:3000"
    );
}
