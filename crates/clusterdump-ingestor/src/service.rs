//! Reference ingest backend
//!
//! [`LocalIngestor`] accepts datasets that are reachable on the local
//! filesystem. Compressed archives are checksum-verified and copied into the
//! data directory; uncompressed datasets are recorded in place. The latest
//! accepted dataset per cluster is kept in memory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use clusterdump_common::api::{ApiError, IngestApi};
use clusterdump_common::checksum::verify_sha256;
use clusterdump_common::types::{
    is_path_segment, DatasetRef, IngestRequest, IngestResponse, IngestedDataset,
    RehydrateLatestRequest, RehydrateLatestResponse,
};
use clusterdump_common::CommonError;
use tokio::sync::Mutex;
use tracing::{info, instrument};

pub struct LocalIngestor {
    data_dir: PathBuf,
    latest: Mutex<HashMap<String, IngestedDataset>>,
}

impl LocalIngestor {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            latest: Mutex::new(HashMap::new()),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn validate(request: &IngestRequest) -> Result<(), ApiError> {
        if request.cluster_name.trim().is_empty() {
            return Err(ApiError::InvalidRequest("cluster_name is empty".to_string()));
        }
        if !is_path_segment(&request.cluster_name) {
            return Err(ApiError::InvalidRequest(format!(
                "cluster_name '{}' is not a valid directory name",
                request.cluster_name
            )));
        }
        if request.dataset.location.is_empty() {
            return Err(ApiError::InvalidRequest("dataset location is empty".to_string()));
        }
        Ok(())
    }

    /// Verify and store a compressed archive, returning its stored location
    async fn store_archive(&self, request: &IngestRequest) -> Result<String, ApiError> {
        let source = PathBuf::from(&request.dataset.location);
        if !source.is_file() {
            return Err(ApiError::NotFound(format!(
                "archive {} does not exist",
                source.display()
            )));
        }

        let expected = request.dataset.sha256.clone();
        let to_verify = source.clone();
        tokio::task::spawn_blocking(move || verify_sha256(&to_verify, &expected))
            .await
            .map_err(|e| ApiError::Backend(format!("checksum task failed: {}", e)))?
            .map_err(|e| match e {
                CommonError::ChecksumMismatch { .. } => ApiError::InvalidRequest(e.to_string()),
                other => ApiError::Backend(other.to_string()),
            })?;

        let cluster_dir = self.data_dir.join(&request.cluster_name);
        tokio::fs::create_dir_all(&cluster_dir)
            .await
            .map_err(|e| ApiError::Backend(format!("{}: {}", cluster_dir.display(), e)))?;

        let target = cluster_dir.join(format!("{}.tar.gz", request.run_id));
        tokio::fs::copy(&source, &target)
            .await
            .map_err(|e| ApiError::Backend(format!("{}: {}", target.display(), e)))?;

        Ok(target.display().to_string())
    }
}

#[async_trait]
impl IngestApi for LocalIngestor {
    #[instrument(skip(self, request), fields(cluster = %request.cluster_name, run_id = %request.run_id))]
    async fn ingest(&self, request: IngestRequest) -> Result<IngestResponse, ApiError> {
        Self::validate(&request)?;

        let location = if request.dataset.compressed {
            self.store_archive(&request).await?
        } else if Path::new(&request.dataset.location).is_dir() {
            request.dataset.location.clone()
        } else {
            return Err(ApiError::NotFound(format!(
                "dataset directory {} does not exist",
                request.dataset.location
            )));
        };

        let accepted_at = Utc::now();
        let entry = IngestedDataset {
            run_id: request.run_id,
            cluster_name: request.cluster_name.clone(),
            dataset: DatasetRef {
                location,
                ..request.dataset
            },
            ingested_at: accepted_at,
        };

        self.latest
            .lock()
            .await
            .insert(request.cluster_name, entry);

        info!("Dataset ingested");

        Ok(IngestResponse {
            run_id: request.run_id,
            accepted_at,
        })
    }

    async fn rehydrate_latest(
        &self,
        request: RehydrateLatestRequest,
    ) -> Result<RehydrateLatestResponse, ApiError> {
        let latest = self.latest.lock().await.get(&request.cluster_name).cloned();
        Ok(RehydrateLatestResponse { latest })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clusterdump_common::checksum::sha256_file;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn archive_request(dir: &Path, cluster: &str) -> IngestRequest {
        let archive = dir.join("dump.tar.gz");
        std::fs::write(&archive, b"not really gzip but bytes are bytes").unwrap();
        IngestRequest {
            run_id: Uuid::new_v4(),
            cluster_name: cluster.to_string(),
            dataset: DatasetRef {
                location: archive.display().to_string(),
                size_bytes: 35,
                sha256: sha256_file(&archive).unwrap(),
                compressed: true,
            },
        }
    }

    #[tokio::test]
    async fn test_ingest_copies_archive_and_records_latest() {
        let source = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let ingestor = LocalIngestor::new(data.path());

        let request = archive_request(source.path(), "prod");
        let response = ingestor.ingest(request.clone()).await.unwrap();
        assert_eq!(response.run_id, request.run_id);

        let stored = data
            .path()
            .join("prod")
            .join(format!("{}.tar.gz", request.run_id));
        assert!(stored.is_file());

        let latest = ingestor
            .rehydrate_latest(RehydrateLatestRequest {
                cluster_name: "prod".to_string(),
            })
            .await
            .unwrap()
            .latest
            .unwrap();
        assert_eq!(latest.run_id, request.run_id);
        assert_eq!(latest.dataset.location, stored.display().to_string());
        assert_eq!(latest.dataset.sha256, request.dataset.sha256);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_invalid_request() {
        let source = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let ingestor = LocalIngestor::new(data.path());

        let mut request = archive_request(source.path(), "prod");
        request.dataset.sha256 = "deadbeef".to_string();

        let err = ingestor.ingest(request).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_missing_archive_is_not_found() {
        let data = TempDir::new().unwrap();
        let ingestor = LocalIngestor::new(data.path());

        let mut request = archive_request(data.path(), "prod");
        request.dataset.location = data.path().join("gone.tar.gz").display().to_string();

        let err = ingestor.ingest(request).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_latest_is_per_cluster_and_newest_wins() {
        let source = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let ingestor = LocalIngestor::new(data.path());

        let first = archive_request(source.path(), "prod");
        let second = archive_request(source.path(), "prod");
        let other = archive_request(source.path(), "staging");
        ingestor.ingest(first).await.unwrap();
        ingestor.ingest(second.clone()).await.unwrap();
        ingestor.ingest(other.clone()).await.unwrap();

        let latest = |cluster: &str| RehydrateLatestRequest {
            cluster_name: cluster.to_string(),
        };
        let prod = ingestor.rehydrate_latest(latest("prod")).await.unwrap();
        assert_eq!(prod.latest.unwrap().run_id, second.run_id);

        let staging = ingestor.rehydrate_latest(latest("staging")).await.unwrap();
        assert_eq!(staging.latest.unwrap().run_id, other.run_id);

        let unknown = ingestor.rehydrate_latest(latest("dev")).await.unwrap();
        assert!(unknown.latest.is_none());
    }

    #[tokio::test]
    async fn test_uncompressed_dataset_recorded_in_place() {
        let dataset = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let ingestor = LocalIngestor::new(data.path());

        let request = IngestRequest {
            run_id: Uuid::new_v4(),
            cluster_name: "prod".to_string(),
            dataset: DatasetRef {
                location: dataset.path().display().to_string(),
                size_bytes: 0,
                sha256: String::new(),
                compressed: false,
            },
        };
        ingestor.ingest(request.clone()).await.unwrap();

        let latest = ingestor
            .rehydrate_latest(RehydrateLatestRequest {
                cluster_name: "prod".to_string(),
            })
            .await
            .unwrap()
            .latest
            .unwrap();
        assert_eq!(latest.dataset.location, request.dataset.location);
    }

    #[tokio::test]
    async fn test_empty_cluster_name_rejected() {
        let source = TempDir::new().unwrap();
        let ingestor = LocalIngestor::new(source.path());
        let request = archive_request(source.path(), " ");
        assert!(matches!(
            ingestor.ingest(request).await,
            Err(ApiError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_cluster_name_cannot_leave_data_dir() {
        let root = TempDir::new().unwrap();
        let data = root.path().join("data");
        let ingestor = LocalIngestor::new(&data);

        for cluster in ["../escaped", "/abs", "prod/nested", ".."] {
            let request = archive_request(root.path(), cluster);
            let err = ingestor.ingest(request).await.unwrap_err();
            assert!(matches!(err, ApiError::InvalidRequest(_)), "{cluster}: {err:?}");
        }

        assert!(!root.path().join("escaped").exists());
        assert!(!data.exists());
    }
}
