//! Dataset packaging
//!
//! A finished dataset directory is packed into a single `.tar.gz` whose
//! entries are relative to the dataset root, so unpacking it anywhere yields
//! `metadata.json` plus one directory per resource type.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Component, Path};

use clusterdump_common::checksum::sha256_file;
use clusterdump_common::types::{DatasetRef, RunMetadata, METADATA_FILE_NAME};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::info;
use uuid::Uuid;

use crate::error::{DumpError, Result};

pub const ARCHIVE_EXTENSION: &str = "tar.gz";

/// Default archive file name for a run
pub fn archive_name(cluster_name: &str, run_id: &Uuid) -> String {
    format!("clusterdump_{}_{}.{}", cluster_name, run_id, ARCHIVE_EXTENSION)
}

pub fn is_archive(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(".tar.gz") || n.ends_with(".tgz"))
}

/// Pack `dataset_dir` into `archive_path` and describe the result
pub fn package_dataset(dataset_dir: &Path, archive_path: &Path) -> Result<DatasetRef> {
    if let Some(parent) = archive_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| DumpError::io("create directory", parent, e))?;
    }

    let file = File::create(archive_path).map_err(|e| DumpError::io("create", archive_path, e))?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    builder
        .append_dir_all(".", dataset_dir)
        .map_err(|e| DumpError::io("archive", dataset_dir, e))?;

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(|e| DumpError::io("finish archive", archive_path, e))?;

    let dataset = describe_archive(archive_path)?;

    info!(
        archive = %archive_path.display(),
        size_bytes = dataset.size_bytes,
        "Dataset packaged"
    );

    Ok(dataset)
}

/// Size and checksum of an existing archive
pub fn describe_archive(archive_path: &Path) -> Result<DatasetRef> {
    let size_bytes = std::fs::metadata(archive_path)
        .map_err(|e| DumpError::io("stat", archive_path, e))?
        .len();
    let sha256 = sha256_file(archive_path).map_err(|e| DumpError::Archive(e.to_string()))?;
    let location = std::fs::canonicalize(archive_path)
        .map_err(|e| DumpError::io("resolve", archive_path, e))?;

    Ok(DatasetRef {
        location: location.display().to_string(),
        size_bytes,
        sha256,
        compressed: true,
    })
}

/// Read the run metadata stored at the root of an archive
pub fn read_metadata(archive_path: &Path) -> Result<RunMetadata> {
    let file = File::open(archive_path).map_err(|e| DumpError::io("open", archive_path, e))?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    let read_error =
        |e: std::io::Error| DumpError::Archive(format!("failed to read {}: {}", archive_path.display(), e));

    for entry in archive.entries().map_err(read_error)? {
        let entry = entry.map_err(read_error)?;
        let is_metadata = entry
            .path()
            .map_err(read_error)?
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .eq([Component::Normal(METADATA_FILE_NAME.as_ref())]);

        if is_metadata {
            return Ok(serde_json::from_reader(entry)?);
        }
    }

    Err(DumpError::Archive(format!(
        "{} has no {}",
        archive_path.display(),
        METADATA_FILE_NAME
    )))
}

/// Describe a dataset left as a plain directory
pub fn directory_dataset(dataset_dir: &Path) -> DatasetRef {
    DatasetRef {
        location: dataset_dir.display().to_string(),
        size_bytes: 0,
        sha256: String::new(),
        compressed: false,
    }
}

/// Unpack an archive produced by [`package_dataset`] into `dest`
pub fn unpack_dataset(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path).map_err(|e| DumpError::io("open", archive_path, e))?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));

    archive
        .unpack(dest)
        .map_err(|e| DumpError::Archive(format!("failed to unpack {}: {}", archive_path.display(), e)))
}
