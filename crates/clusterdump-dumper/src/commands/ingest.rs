//! `clusterdump ingest` command implementation

use std::path::Path;

use clusterdump_common::api::IngestApi;
use clusterdump_common::types::{IngestRequest, IngestResponse};
use colored::Colorize;
use uuid::Uuid;

use super::{format_bytes, format_time};
use crate::archive;
use crate::config::DumpConfig;
use crate::error::{DumpError, Result};
use crate::ingest::HttpIngestClient;

/// Build the ingest request for an existing archive.
///
/// Cluster name and run id fall back to the archive's own metadata.
pub fn build_request(
    archive_path: &Path,
    cluster: Option<String>,
    run_id: Option<Uuid>,
) -> Result<IngestRequest> {
    if !archive::is_archive(archive_path) {
        return Err(DumpError::config(format!(
            "{} is not a .tar.gz dataset archive",
            archive_path.display()
        )));
    }

    let (cluster_name, run_id) = match (cluster, run_id) {
        (Some(cluster), Some(run_id)) => (cluster, run_id),
        (cluster, run_id) => {
            let metadata = archive::read_metadata(archive_path)?;
            (
                cluster.unwrap_or(metadata.cluster_name),
                run_id.unwrap_or(metadata.run_id),
            )
        },
    };

    Ok(IngestRequest {
        run_id,
        cluster_name,
        dataset: archive::describe_archive(archive_path)?,
    })
}

/// Submit an existing archive
pub async fn run(
    config: &DumpConfig,
    archive_path: &Path,
    cluster: Option<String>,
    run_id: Option<Uuid>,
) -> Result<IngestResponse> {
    let request = build_request(archive_path, cluster, run_id)?;
    let client = HttpIngestClient::from_config(&config.ingestor)?;

    println!(
        "Submitting {} ({}) for cluster '{}'",
        request.dataset.location,
        format_bytes(request.dataset.size_bytes),
        request.cluster_name
    );

    let response = client.ingest(request).await?;

    println!(
        "{} Ingested run {} at {}",
        "✓".green(),
        response.run_id,
        format_time(&response.accepted_at)
    );

    Ok(response)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clusterdump_common::types::{RunMetadata, METADATA_FILE_NAME};
    use tempfile::TempDir;

    fn archive_with_metadata(dir: &Path, metadata: &RunMetadata) -> std::path::PathBuf {
        let source = dir.join("source");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(
            source.join(METADATA_FILE_NAME),
            serde_json::to_vec(metadata).unwrap(),
        )
        .unwrap();

        let archive = dir.join("dump.tar.gz");
        archive::package_dataset(&source, &archive).unwrap();
        archive
    }

    #[test]
    fn test_request_defaults_come_from_archive() {
        let dir = TempDir::new().unwrap();
        let metadata = RunMetadata::new("prod");
        let archive = archive_with_metadata(dir.path(), &metadata);

        let request = build_request(&archive, None, None).unwrap();
        assert_eq!(request.cluster_name, "prod");
        assert_eq!(request.run_id, metadata.run_id);
        assert!(request.dataset.compressed);

        let request = build_request(&archive, Some("override".to_string()), None).unwrap();
        assert_eq!(request.cluster_name, "override");
    }

    #[test]
    fn test_request_rejects_non_archive() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            build_request(dir.path(), None, None),
            Err(DumpError::Config(_))
        ));
    }
}
