//! HTTP surface of the ingest service
//!
//! | Method | Path                        | Operation         |
//! |--------|-----------------------------|-------------------|
//! | POST   | `/api/v1/ingest`            | Ingest            |
//! | POST   | `/api/v1/rehydrate/latest`  | RehydrateLatest   |
//! | GET    | `/health`                   | liveness          |
//!
//! Any other path under `/api/v1` answers `501` with an `UNIMPLEMENTED`
//! error body, which clients treat as "operation not supported".

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{StatusCode, Uri},
    routing::{get, post},
    Json, Router,
};
use clusterdump_common::api::{
    ApiError, IngestApi, API_PREFIX, HEALTH_PATH, INGEST_PATH, REHYDRATE_LATEST_PATH,
};
use clusterdump_common::types::{
    IngestRequest, IngestResponse, RehydrateLatestRequest, RehydrateLatestResponse,
};
use serde_json::{json, Value};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::error::AppError;

/// Shared handler state
pub type ApiState = Arc<dyn IngestApi>;

/// Build the router over any ingest backend
pub fn router(service: ApiState) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health_check))
        .route(INGEST_PATH, post(ingest))
        .route(REHYDRATE_LATEST_PATH, post(rehydrate_latest))
        .fallback(unknown_route)
        .with_state(service)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(tower_http::LatencyUnit::Micros),
                ),
        )
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn ingest(
    State(service): State<ApiState>,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<Json<IngestResponse>, AppError> {
    let Json(request) = payload?;
    Ok(Json(service.ingest(request).await?))
}

async fn rehydrate_latest(
    State(service): State<ApiState>,
    payload: Result<Json<RehydrateLatestRequest>, JsonRejection>,
) -> Result<Json<RehydrateLatestResponse>, AppError> {
    let Json(request) = payload?;
    Ok(Json(service.rehydrate_latest(request).await?))
}

async fn unknown_route(uri: Uri) -> Result<StatusCode, AppError> {
    let path = uri.path();
    if path.starts_with(API_PREFIX) {
        let operation = path.trim_start_matches(API_PREFIX).trim_start_matches('/');
        return Err(ApiError::Unimplemented(operation.to_string()).into());
    }
    Ok(StatusCode::NOT_FOUND)
}
