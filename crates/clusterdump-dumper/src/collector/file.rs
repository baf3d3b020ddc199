//! Replay collector reading a previously written dataset
//!
//! Accepts a dataset directory or a `.tar.gz` produced by an earlier dump run.
//! Archives are unpacked into a temporary directory that lives as long as the
//! collector.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clusterdump_common::types::{is_path_segment, RunMetadata, METADATA_FILE_NAME};
use futures::StreamExt;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::RecordStream;
use crate::archive;
use crate::error::{DumpError, Result};
use crate::resource::{RawObject, ResourceType, RECORD_FILE_EXTENSION};

const RECORD_CHANNEL_SIZE: usize = 256;

pub struct FileCollector {
    root: PathBuf,
    cluster_name: String,
    // Keeps an unpacked archive on disk until the collector is dropped
    unpacked: Option<Arc<TempDir>>,
}

impl FileCollector {
    pub fn open(path: &Path) -> Result<Self> {
        let (root, unpacked) = if archive::is_archive(path) {
            let dir = tempfile::Builder::new()
                .prefix("clusterdump-replay-")
                .tempdir()
                .map_err(|e| DumpError::io("create temporary directory", path, e))?;
            archive::unpack_dataset(path, dir.path())?;
            (dir.path().to_path_buf(), Some(Arc::new(dir)))
        } else if path.is_dir() {
            (path.to_path_buf(), None)
        } else {
            return Err(DumpError::config(format!(
                "{} is neither a dataset directory nor a .tar.gz archive",
                path.display()
            )));
        };

        let cluster_name = read_cluster_name(&root).unwrap_or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown")
                .trim_end_matches(".tar")
                .to_string()
        });

        Ok(Self {
            root,
            cluster_name,
            unpacked,
        })
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stream every record stored under `<root>/<resource>/`, files in
    /// lexical order, lines in file order.
    pub fn produce(&self, resource: ResourceType, cancel: CancellationToken) -> RecordStream {
        let (tx, rx) = mpsc::channel(RECORD_CHANNEL_SIZE);
        let dir = self.root.join(resource.as_str());
        let keep_alive = self.unpacked.clone();

        tokio::spawn(async move {
            let _keep_alive = keep_alive;
            replay_directory(dir, resource, tx, cancel).await;
        });

        ReceiverStream::new(rx).boxed()
    }
}

/// Cluster name recorded in the dataset, if it is usable as a directory name
fn read_cluster_name(root: &Path) -> Option<String> {
    let content = std::fs::read(root.join(METADATA_FILE_NAME)).ok()?;
    match serde_json::from_slice::<RunMetadata>(&content) {
        Ok(metadata) if is_path_segment(&metadata.cluster_name) => Some(metadata.cluster_name),
        Ok(metadata) => {
            warn!(cluster = %metadata.cluster_name, "Ignoring unusable cluster name in dataset metadata");
            None
        },
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable dataset metadata");
            None
        },
    }
}

/// Record files below `dir` in lexical order. Blocking; run off the runtime.
fn record_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            DumpError::io("list", path, e.into())
        })?;

        let is_record = entry.file_type().is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some(RECORD_FILE_EXTENSION);
        if is_record {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

async fn replay_directory(
    dir: PathBuf,
    resource: ResourceType,
    tx: mpsc::Sender<Result<RawObject>>,
    cancel: CancellationToken,
) {
    let listing = {
        let dir = dir.clone();
        tokio::task::spawn_blocking(move || record_files(&dir)).await
    };

    let files = match listing {
        Ok(Ok(files)) => files,
        Ok(Err(e)) => {
            let _ = tx.send(Err(e)).await;
            return;
        },
        Err(join_error) => {
            let e = DumpError::Pipeline(format!("listing {} failed: {}", dir.display(), join_error));
            let _ = tx.send(Err(e)).await;
            return;
        },
    };

    if files.is_empty() {
        debug!(%resource, dir = %dir.display(), "No records for resource type");
        return;
    }

    for path in files {
        if let Err(e) = replay_file(&path, resource, &tx, &cancel).await {
            tokio::select! {
                _ = cancel.cancelled() => {},
                _ = tx.send(Err(e)) => {},
            }
            return;
        }
        if cancel.is_cancelled() || tx.is_closed() {
            return;
        }
    }
}

/// Send every line of one file. Only I/O failures end the replay; a line that
/// does not parse is forwarded as a per-record error.
async fn replay_file(
    path: &Path,
    resource: ResourceType,
    tx: &mpsc::Sender<Result<RawObject>>,
    cancel: &CancellationToken,
) -> Result<()> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| DumpError::io("open", path, e))?;
    let mut lines = BufReader::new(file).lines();
    let mut line_number = 0usize;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| DumpError::io("read", path, e))?
    {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }

        let item = serde_json::from_str(&line)
            .map(|value| RawObject::new(resource, value))
            .map_err(|e| {
                DumpError::malformed(
                    resource,
                    format!("{}:{}: {}", path.display(), line_number, e),
                )
            });

        let delivered = tokio::select! {
            _ = cancel.cancelled() => false,
            sent = tx.send(item) => sent.is_ok(),
        };
        if !delivered {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn names(objects: &[RawObject]) -> Vec<&str> {
        objects
            .iter()
            .map(|o| o.value["metadata"]["name"].as_str().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_replays_files_in_lexical_order() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "pods/kube-system.ndjson", "{\"metadata\":{\"name\":\"c\"}}\n");
        write(
            dir.path(),
            "pods/default.ndjson",
            "{\"metadata\":{\"name\":\"a\"}}\n\n{\"metadata\":{\"name\":\"b\"}}\n",
        );
        write(dir.path(), "pods/notes.txt", "ignored");

        let collector = FileCollector::open(dir.path()).unwrap();
        let objects: Vec<RawObject> = collector
            .produce(ResourceType::Pods, CancellationToken::new())
            .try_collect()
            .await
            .unwrap();

        assert_eq!(names(&objects), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_missing_resource_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let collector = FileCollector::open(dir.path()).unwrap();

        let objects: Vec<_> = collector
            .produce(ResourceType::Nodes, CancellationToken::new())
            .collect()
            .await;
        assert!(objects.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_line_is_a_record_error() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "nodes/cluster.ndjson",
            "{\"metadata\":{\"name\":\"n1\"}}\nnot json\n{\"metadata\":{\"name\":\"n2\"}}\n",
        );

        let collector = FileCollector::open(dir.path()).unwrap();
        let results: Vec<_> = collector
            .produce(ResourceType::Nodes, CancellationToken::new())
            .collect()
            .await;

        assert_eq!(results.len(), 3);
        assert!(matches!(results[1], Err(DumpError::MalformedRecord { .. })));
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn test_replays_archive_and_reads_cluster_name() {
        let dir = TempDir::new().unwrap();
        let metadata = RunMetadata::new("staging");
        write(
            dir.path(),
            METADATA_FILE_NAME,
            &serde_json::to_string(&metadata).unwrap(),
        );
        write(dir.path(), "nodes/cluster.ndjson", "{\"metadata\":{\"name\":\"n1\"}}\n");

        let out = TempDir::new().unwrap();
        let archive_path = out.path().join("dump.tar.gz");
        archive::package_dataset(dir.path(), &archive_path).unwrap();

        let collector = FileCollector::open(&archive_path).unwrap();
        assert_eq!(collector.cluster_name(), "staging");

        let objects: Vec<RawObject> = collector
            .produce(ResourceType::Nodes, CancellationToken::new())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(names(&objects), vec!["n1"]);
    }

    #[test]
    fn test_unusable_cluster_name_falls_back_to_file_name() {
        let dir = TempDir::new().unwrap();
        let metadata = RunMetadata::new("../escaped");
        write(
            dir.path(),
            METADATA_FILE_NAME,
            &serde_json::to_string(&metadata).unwrap(),
        );

        let out = TempDir::new().unwrap();
        let archive_path = out.path().join("nightly.tar.gz");
        archive::package_dataset(dir.path(), &archive_path).unwrap();

        let collector = FileCollector::open(&archive_path).unwrap();
        assert_eq!(collector.cluster_name(), "nightly");
    }

    #[test]
    fn test_record_files_walks_nested_directories_in_order() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "pods/b.ndjson", "");
        write(dir.path(), "pods/a/z.ndjson", "");
        write(dir.path(), "pods/a/y.txt", "");

        let files = record_files(&dir.path().join("pods")).unwrap();
        let relative: Vec<_> = files
            .iter()
            .map(|f| f.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            relative,
            vec![PathBuf::from("pods/a/z.ndjson"), PathBuf::from("pods/b.ndjson")]
        );

        assert!(record_files(&dir.path().join("nodes")).unwrap().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_replay_on_single_threaded_runtime() {
        let dir = TempDir::new().unwrap();
        for ns in ["a", "b", "c"] {
            write(
                dir.path(),
                &format!("roles/{ns}.ndjson"),
                &format!("{{\"metadata\":{{\"name\":\"{ns}\"}}}}\n"),
            );
        }

        let collector = FileCollector::open(dir.path()).unwrap();
        let objects: Vec<RawObject> = collector
            .produce(ResourceType::Roles, CancellationToken::new())
            .try_collect()
            .await
            .unwrap();
        assert_eq!(names(&objects), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_open_rejects_missing_path() {
        assert!(matches!(
            FileCollector::open(Path::new("/nonexistent/clusterdump")),
            Err(DumpError::Config(_))
        ));
    }
}
