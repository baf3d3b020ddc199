//! Wire and on-disk types shared across clusterdump

use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// File name of the run metadata stored at the root of every dataset
pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Whether `name` can be joined onto a directory without leaving it.
///
/// Accepts exactly one normal path component: no separators, no `.` or `..`,
/// no root or drive prefix.
pub fn is_path_segment(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(segment)), None) if segment == name
    )
}

/// Metadata describing the run that produced a dataset.
///
/// Written to `<output_root>/metadata.json` before collection starts and
/// read back by the file collector when replaying a dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMetadata {
    /// Unique identifier of the dump run
    pub run_id: Uuid,

    /// Name of the cluster the data was collected from
    pub cluster_name: String,

    /// Timestamp when collection started
    pub started_at: DateTime<Utc>,
}

impl RunMetadata {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            cluster_name: cluster_name.into(),
            started_at: Utc::now(),
        }
    }
}

/// Reference to a finished dataset, in the shape the ingest boundary expects
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetRef {
    /// Path or URL of the dataset (archive file or directory)
    pub location: String,

    /// Size in bytes of the archive (0 for an uncompressed directory)
    pub size_bytes: u64,

    /// Hex sha256 of the archive (empty for an uncompressed directory)
    pub sha256: String,

    /// Whether `location` points at a `.tar.gz` archive
    pub compressed: bool,
}

/// Submit a finished dataset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestRequest {
    pub run_id: Uuid,
    pub cluster_name: String,
    pub dataset: DatasetRef,
}

/// Acknowledgement of an accepted dataset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestResponse {
    pub run_id: Uuid,
    pub accepted_at: DateTime<Utc>,
}

/// Look up the latest successful ingest for a cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RehydrateLatestRequest {
    pub cluster_name: String,
}

/// Metadata of one successfully ingested dataset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestedDataset {
    pub run_id: Uuid,
    pub cluster_name: String,
    pub dataset: DatasetRef,
    pub ingested_at: DateTime<Utc>,
}

/// Latest ingest for the requested cluster, if any
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RehydrateLatestResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<IngestedDataset>,
}
