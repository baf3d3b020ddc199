//! HTTP client for the ingest service

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clusterdump_common::api::{
    ErrorBody, IngestApi, INGEST_PATH, OP_INGEST, OP_REHYDRATE_LATEST, REHYDRATE_LATEST_PATH,
};
use clusterdump_common::types::{
    IngestRequest, IngestResponse, IngestedDataset, RehydrateLatestRequest,
    RehydrateLatestResponse,
};
use clusterdump_common::ApiError;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::IngestorConfig;
use crate::error::{DumpError, Result};

/// [`IngestApi`] over JSON/HTTP
pub struct HttpIngestClient {
    client: Client,
    base_url: String,
}

impl HttpIngestClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DumpError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &IngestorConfig) -> Result<Self> {
        Self::new(config.api_endpoint.clone(), config.timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<Req, Resp>(
        &self,
        path: &str,
        operation: &str,
        request: &Req,
    ) -> std::result::Result<Resp, ApiError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, operation, "Calling ingest service");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| ApiError::Transport(format!("invalid {} response: {}", operation, e)));
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(error) => Err(ApiError::from_wire(error)),
            Err(_) if status == StatusCode::NOT_IMPLEMENTED => {
                Err(ApiError::Unimplemented(operation.to_string()))
            },
            Err(_) => Err(ApiError::Transport(format!("HTTP {}: {}", status, body.trim()))),
        }
    }
}

#[async_trait]
impl IngestApi for HttpIngestClient {
    async fn ingest(&self, request: IngestRequest) -> std::result::Result<IngestResponse, ApiError> {
        self.post(INGEST_PATH, OP_INGEST, &request).await
    }

    async fn rehydrate_latest(
        &self,
        request: RehydrateLatestRequest,
    ) -> std::result::Result<RehydrateLatestResponse, ApiError> {
        self.post(REHYDRATE_LATEST_PATH, OP_REHYDRATE_LATEST, &request)
            .await
    }
}

/// Whether a new collection is needed given the latest ingest.
///
/// Without `max_age` every run collects.
pub fn should_collect(
    latest: Option<&IngestedDataset>,
    now: DateTime<Utc>,
    max_age: Option<Duration>,
) -> bool {
    let (Some(latest), Some(max_age)) = (latest, max_age) else {
        return true;
    };

    match (now - latest.ingested_at).to_std() {
        Ok(age) => age >= max_age,
        // Ingested in the future relative to our clock: treat as fresh
        Err(_) => false,
    }
}
