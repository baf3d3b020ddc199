//! Router tests for the ingest HTTP surface

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use clusterdump_common::api::{
    ErrorBody, IngestApi, HEALTH_PATH, INGEST_PATH, REHYDRATE_LATEST_PATH,
};
use clusterdump_common::checksum::sha256_file;
use clusterdump_common::types::{
    DatasetRef, IngestRequest, IngestResponse, RehydrateLatestResponse,
};
use clusterdump_ingestor::{api, LocalIngestor};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt; // for `oneshot`
use uuid::Uuid;

/// A backend that predates every operation
struct Legacy;

impl IngestApi for Legacy {}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn local_app(data_dir: &TempDir) -> Router {
    api::router(Arc::new(LocalIngestor::new(data_dir.path())))
}

#[tokio::test]
async fn test_health_check() {
    let data = TempDir::new().unwrap();
    let response = local_app(&data)
        .oneshot(Request::builder().uri(HEALTH_PATH).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = read_json(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_ingest_then_rehydrate_latest() {
    let source = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let app = local_app(&data);

    let archive = source.path().join("dump.tar.gz");
    std::fs::write(&archive, b"archive bytes").unwrap();
    let request = IngestRequest {
        run_id: Uuid::new_v4(),
        cluster_name: "prod".to_string(),
        dataset: DatasetRef {
            location: archive.display().to_string(),
            size_bytes: 13,
            sha256: sha256_file(&archive).unwrap(),
            compressed: true,
        },
    };

    let response = app
        .clone()
        .oneshot(post_json(INGEST_PATH, &serde_json::to_value(&request).unwrap()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let accepted: IngestResponse = read_json(response).await;
    assert_eq!(accepted.run_id, request.run_id);

    let response = app
        .oneshot(post_json(REHYDRATE_LATEST_PATH, &json!({"cluster_name": "prod"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let latest: RehydrateLatestResponse = read_json(response).await;
    assert_eq!(latest.latest.unwrap().run_id, request.run_id);
}

#[tokio::test]
async fn test_rehydrate_unknown_cluster_is_empty() {
    let data = TempDir::new().unwrap();
    let response = local_app(&data)
        .oneshot(post_json(REHYDRATE_LATEST_PATH, &json!({"cluster_name": "nope"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = read_json(response).await;
    assert_eq!(body, json!({}));
}

#[tokio::test]
async fn test_unknown_operation_is_unimplemented() {
    let data = TempDir::new().unwrap();
    let response = local_app(&data)
        .oneshot(post_json("/api/v1/rehydrate/all", &json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    let body: ErrorBody = read_json(response).await;
    assert_eq!(body.code, "UNIMPLEMENTED");
    assert_eq!(body.message, "rehydrate/all");
}

#[tokio::test]
async fn test_unimplemented_backend_answers_501() {
    let response = api::router(Arc::new(Legacy))
        .oneshot(post_json(REHYDRATE_LATEST_PATH, &json!({"cluster_name": "prod"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    let body: ErrorBody = read_json(response).await;
    assert_eq!(body.code, "UNIMPLEMENTED");
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let data = TempDir::new().unwrap();
    let response = local_app(&data)
        .oneshot(post_json(INGEST_PATH, &json!({"cluster_name": 7})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = read_json(response).await;
    assert_eq!(body.code, "INVALID_REQUEST");
}

#[tokio::test]
async fn test_checksum_mismatch_is_bad_request() {
    let source = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();

    let archive = source.path().join("dump.tar.gz");
    std::fs::write(&archive, b"archive bytes").unwrap();
    let request = json!({
        "run_id": Uuid::new_v4(),
        "cluster_name": "prod",
        "dataset": {
            "location": archive.display().to_string(),
            "size_bytes": 13,
            "sha256": "0000",
            "compressed": true,
        },
    });

    let response = local_app(&data)
        .oneshot(post_json(INGEST_PATH, &request))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_non_api_path_is_not_found() {
    let data = TempDir::new().unwrap();
    let response = local_app(&data)
        .oneshot(Request::builder().uri("/favicon.ico").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
