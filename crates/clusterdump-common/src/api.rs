//! Ingest service contract
//!
//! The ingest boundary exposes two request/response operations:
//!
//! - **Ingest**: submit a finished dataset
//! - **RehydrateLatest**: fetch metadata about the latest successful ingest
//!
//! Both trait methods have default bodies returning
//! [`ApiError::Unimplemented`], so an implementation written against an
//! older revision of the contract keeps compiling and answers new operations
//! with a distinguishable error instead of failing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    IngestRequest, IngestResponse, RehydrateLatestRequest, RehydrateLatestResponse,
};

/// Operation names used in errors and logs
pub const OP_INGEST: &str = "Ingest";
pub const OP_REHYDRATE_LATEST: &str = "RehydrateLatest";

// ============================================================================
// HTTP Routes
// ============================================================================

pub const API_PREFIX: &str = "/api/v1";
pub const INGEST_PATH: &str = "/api/v1/ingest";
pub const REHYDRATE_LATEST_PATH: &str = "/api/v1/rehydrate/latest";
pub const HEALTH_PATH: &str = "/health";

/// Errors crossing the ingest boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The service does not implement the requested operation
    #[error("operation {0} is not implemented by this service")]
    Unimplemented(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The backend behind the boundary failed
    #[error("backend error: {0}")]
    Backend(String),

    /// The request never reached the service or the reply was unreadable
    #[error("transport error: {0}")]
    Transport(String),
}

impl ApiError {
    /// Stable machine-readable code carried in error bodies
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unimplemented(_) => "UNIMPLEMENTED",
            ApiError::InvalidRequest(_) => "INVALID_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Backend(_) => "BACKEND_ERROR",
            ApiError::Transport(_) => "TRANSPORT_ERROR",
        }
    }

    /// Rebuild an error from its wire form
    pub fn from_wire(body: ErrorBody) -> Self {
        match body.code.as_str() {
            "UNIMPLEMENTED" => ApiError::Unimplemented(body.message),
            "INVALID_REQUEST" => ApiError::InvalidRequest(body.message),
            "NOT_FOUND" => ApiError::NotFound(body.message),
            "BACKEND_ERROR" => ApiError::Backend(body.message),
            _ => ApiError::Transport(format!("{}: {}", body.code, body.message)),
        }
    }

    pub fn to_wire(&self) -> ErrorBody {
        let message = match self {
            ApiError::Unimplemented(m)
            | ApiError::InvalidRequest(m)
            | ApiError::NotFound(m)
            | ApiError::Backend(m)
            | ApiError::Transport(m) => m.clone(),
        };
        ErrorBody {
            code: self.code().to_string(),
            message,
        }
    }

    pub fn is_unimplemented(&self) -> bool {
        matches!(self, ApiError::Unimplemented(_))
    }
}

/// JSON error body returned by the ingestor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// The ingest service
#[async_trait]
pub trait IngestApi: Send + Sync {
    /// Submit a finished dataset
    async fn ingest(&self, _request: IngestRequest) -> Result<IngestResponse, ApiError> {
        Err(ApiError::Unimplemented(OP_INGEST.to_string()))
    }

    /// Return metadata of the latest successfully ingested dataset
    async fn rehydrate_latest(
        &self,
        _request: RehydrateLatestRequest,
    ) -> Result<RehydrateLatestResponse, ApiError> {
        Err(ApiError::Unimplemented(OP_REHYDRATE_LATEST.to_string()))
    }
}
