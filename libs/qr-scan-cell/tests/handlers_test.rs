mod common;

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use qr_scan_cell::{doctor_scan_routes, scan_routes, ScanState};
use shared_config::AppConfig;
use shared_utils::test_utils::{
    JwtTestUtils, MockLookupResponses, TestConfig, TestUser, TEST_JWT_SECRET,
};

use common::{qr_png, structured_payload, PATIENT_ID};

fn create_app(config: Arc<AppConfig>) -> Router {
    let state = ScanState::new(config).unwrap();
    Router::new()
        .nest("/scan", scan_routes(state.clone()))
        .nest("/doctor/scan", doctor_scan_routes(state))
}

fn app_for(server: &MockServer) -> Router {
    create_app(TestConfig::with_records_url(server.uri()).to_arc())
}

async fn mount_summary(server: &MockServer, status: u16, expected_calls: u64) {
    let template = if status == 200 {
        ResponseTemplate::new(200)
            .set_body_json(MockLookupResponses::health_summary_response(PATIENT_ID))
    } else {
        ResponseTemplate::new(status)
            .set_body_json(MockLookupResponses::error_response("lookup failed"))
    };

    Mock::given(method("GET"))
        .and(path(format!("/api/patients/{}/summary", PATIENT_ID)))
        .respond_with(template)
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn manual_request(uri: &str, patient_id: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder
        .body(Body::from(json!({ "patient_id": patient_id }).to_string()))
        .unwrap()
}

fn upload_request(uri: &str, image: Vec<u8>, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "image/png");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(image)).unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_manual_scan_returns_summary() {
    let mock_server = MockServer::start().await;
    mount_summary(&mock_server, 200, 1).await;

    let response = app_for(&mock_server)
        .oneshot(manual_request("/scan/manual", PATIENT_ID, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["patient_id"], PATIENT_ID);
    assert_eq!(body["summary"]["patient"]["name"], "Ada Lovelace");
    assert!(body["resolved_at"].is_string());
}

#[tokio::test]
async fn test_upload_scan_resolves_structured_code() {
    let mock_server = MockServer::start().await;
    mount_summary(&mock_server, 200, 1).await;

    let image = qr_png(&structured_payload(PATIENT_ID));
    let response = app_for(&mock_server)
        .oneshot(upload_request("/scan/upload", image, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["patient_id"], PATIENT_ID);
}

#[tokio::test]
async fn test_decode_does_not_contact_backend() {
    let mock_server = MockServer::start().await;

    let payload = json!({ "patientId": PATIENT_ID, "issuer": "ward-3" }).to_string();
    let response = app_for(&mock_server)
        .oneshot(upload_request("/scan/decode", qr_png(&payload), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["text"], payload);
    assert_eq!(body["patient_id"], PATIENT_ID);
    assert!(mock_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_code_is_unprocessable() {
    let mock_server = MockServer::start().await;
    mount_summary(&mock_server, 200, 0).await;

    let response = app_for(&mock_server)
        .oneshot(upload_request("/scan/upload", qr_png("hello"), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("manual entry"));
}

#[tokio::test]
async fn test_unknown_patient_is_not_found() {
    let mock_server = MockServer::start().await;
    mount_summary(&mock_server, 404, 1).await;

    let response = app_for(&mock_server)
        .oneshot(manual_request("/scan/manual", PATIENT_ID, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"], "Patient not found");
}

#[tokio::test]
async fn test_backend_failure_is_bad_gateway() {
    let mock_server = MockServer::start().await;
    mount_summary(&mock_server, 500, 1).await;

    let response = app_for(&mock_server)
        .oneshot(manual_request("/scan/manual", PATIENT_ID, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_empty_upload_is_bad_request() {
    let mock_server = MockServer::start().await;

    let response = app_for(&mock_server)
        .oneshot(upload_request("/scan/upload", Vec::new(), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_blank_manual_entry_is_unprocessable() {
    let mock_server = MockServer::start().await;

    let response = app_for(&mock_server)
        .oneshot(manual_request("/scan/manual", "   ", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(mock_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_doctor_scan_requires_token() {
    let mock_server = MockServer::start().await;

    let response = app_for(&mock_server)
        .oneshot(manual_request("/doctor/scan/manual", PATIENT_ID, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_doctor_scan_rejects_expired_token() {
    let mock_server = MockServer::start().await;
    let token = JwtTestUtils::create_expired_token(&TestUser::doctor("doc@example.com"), TEST_JWT_SECRET);

    let response = app_for(&mock_server)
        .oneshot(manual_request("/doctor/scan/manual", PATIENT_ID, Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_doctor_scan_rejects_patient_role() {
    let mock_server = MockServer::start().await;
    mount_summary(&mock_server, 200, 0).await;
    let token =
        JwtTestUtils::create_test_token(&TestUser::patient("p@example.com"), TEST_JWT_SECRET, None);

    let response = app_for(&mock_server)
        .oneshot(manual_request("/doctor/scan/manual", PATIENT_ID, Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_doctor_scan_forwards_token_to_backend() {
    let mock_server = MockServer::start().await;
    let token =
        JwtTestUtils::create_test_token(&TestUser::doctor("doc@example.com"), TEST_JWT_SECRET, None);

    Mock::given(method("GET"))
        .and(path(format!("/api/patients/{}/summary", PATIENT_ID)))
        .and(wiremock::matchers::header(
            "authorization",
            format!("Bearer {}", token).as_str(),
        ))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(MockLookupResponses::health_summary_response(PATIENT_ID)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let response = app_for(&mock_server)
        .oneshot(upload_request(
            "/doctor/scan/upload",
            qr_png(PATIENT_ID),
            Some(&token),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["patient_id"], PATIENT_ID);
}
