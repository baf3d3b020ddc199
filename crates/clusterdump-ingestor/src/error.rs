//! Server-specific error types

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use clusterdump_common::api::{ApiError, ErrorBody};
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Api(ApiError::Unimplemented(_)) => StatusCode::NOT_IMPLEMENTED,
            AppError::Api(ApiError::InvalidRequest(_)) | AppError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            },
            AppError::Api(ApiError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Api(ApiError::Backend(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Api(ApiError::Transport(_)) => StatusCode::BAD_GATEWAY,
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            AppError::Api(e) => e.to_wire(),
            AppError::BadRequest(message) => {
                ApiError::InvalidRequest(message.clone()).to_wire()
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        (status, Json(self.body())).into_response()
    }
}
