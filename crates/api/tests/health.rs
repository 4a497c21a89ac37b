//! Integration tests for the root and health endpoints.

mod common;

use axum::http::StatusCode;
use common::{body_json, build_test_app, get};

// ---------------------------------------------------------------------------
// Test: GET /health returns 200 with status and version
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_returns_ok_with_json() {
    let response = get(build_test_app(), "/health").await;

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

// ---------------------------------------------------------------------------
// Test: GET / lists the generation endpoints
// ---------------------------------------------------------------------------

#[tokio::test]
async fn service_info_lists_endpoints() {
    let response = get(build_test_app(), "/").await;

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["service"], "imgate");
    let endpoints = json["endpoints"].as_array().unwrap();
    assert!(endpoints.iter().any(|e| e == "POST /api/v1/img2img"));
    assert!(endpoints.iter().any(|e| e == "POST /api/v1/batch-img2img"));
}

// ---------------------------------------------------------------------------
// Test: unreachable workflow server reports 503 with status "error"
// ---------------------------------------------------------------------------

#[tokio::test]
async fn comfyui_health_reports_unreachable_server() {
    let response = get(build_test_app(), "/api/v1/health").await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let json = body_json(response).await;
    assert_eq!(json["status"], "error");
    assert_eq!(json["comfyui_url"], common::UNREACHABLE_COMFYUI);
    assert!(json["error"].is_string());
}

// ---------------------------------------------------------------------------
// Test: Unknown route returns 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_route_returns_404() {
    let response = get(build_test_app(), "/this-route-does-not-exist").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: x-request-id header is present in response
// ---------------------------------------------------------------------------

#[tokio::test]
async fn response_contains_x_request_id_header() {
    let response = get(build_test_app(), "/health").await;

    let request_id = response
        .headers()
        .get("x-request-id")
        .expect("Response must contain an x-request-id header");
    assert_eq!(request_id.to_str().unwrap().len(), 36);
}
