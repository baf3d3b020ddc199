//! Error types for the dump pipeline
//!
//! Every error carries enough context to be attributed to one record, one
//! resource type, or the whole run. [`DumpError::scope`] tells the pipeline
//! which of the three an error is terminal for.

use std::path::PathBuf;

use clusterdump_common::ApiError;
use thiserror::Error;

use crate::resource::ResourceType;

/// Result type alias for dumper operations
pub type Result<T> = std::result::Result<T, DumpError>;

/// How far an error propagates inside a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Only the current record is lost; the worker keeps going
    Record,
    /// The resource type's worker stops; sibling workers are unaffected
    Worker,
    /// Every worker stops and the dataset is invalid
    Pipeline,
}

#[derive(Error, Debug)]
pub enum DumpError {
    /// Invalid recognized option, raised before any I/O
    #[error("Configuration error: {0}")]
    Config(String),

    /// A paginated call against the source failed
    #[error("Collection of {resource} failed: {message}")]
    Collection {
        resource: ResourceType,
        message: String,
    },

    #[error("Source unreachable: {0}")]
    SourceUnreachable(String),

    #[error("Source rejected credentials: {0}")]
    Unauthorized(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Malformed {resource} record: {reason}")]
    MalformedRecord {
        resource: ResourceType,
        reason: String,
    },

    /// Strict-mode cache put found an existing entry
    #[error("Cache entry {key} already exists with value {existing}")]
    CacheConflict { key: String, existing: String },

    #[error("Failed to {op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid output path '{0}': must be relative and stay inside the resource directory")]
    InvalidPath(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Ingest failed: {0}")]
    Ingest(#[from] ApiError),

    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

impl DumpError {
    /// Wrap an I/O error with the operation and path that failed
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn collection(resource: ResourceType, msg: impl Into<String>) -> Self {
        Self::Collection {
            resource,
            message: msg.into(),
        }
    }

    pub fn malformed(resource: ResourceType, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            resource,
            reason: reason.into(),
        }
    }

    pub fn scope(&self) -> ErrorScope {
        match self {
            DumpError::MalformedRecord { .. }
            | DumpError::CacheConflict { .. }
            | DumpError::Serialization(_) => ErrorScope::Record,
            DumpError::Collection { .. }
            | DumpError::Io { .. }
            | DumpError::InvalidPath(_)
            | DumpError::Archive(_) => ErrorScope::Worker,
            DumpError::Config(_)
            | DumpError::SourceUnreachable(_)
            | DumpError::Unauthorized(_)
            | DumpError::Cancelled
            | DumpError::Ingest(_)
            | DumpError::Pipeline(_) => ErrorScope::Pipeline,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.scope() == ErrorScope::Pipeline
    }
}

impl<V: std::fmt::Debug> From<crate::cache::CacheConflict<V>> for DumpError {
    fn from(conflict: crate::cache::CacheConflict<V>) -> Self {
        DumpError::CacheConflict {
            key: conflict.key,
            existing: format!("{:?}", conflict.existing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_scopes() {
        assert_eq!(
            DumpError::malformed(ResourceType::Pods, "no name").scope(),
            ErrorScope::Record
        );
        assert_eq!(
            DumpError::collection(ResourceType::Roles, "HTTP 500").scope(),
            ErrorScope::Worker
        );
        assert!(DumpError::Cancelled.is_fatal());
        assert!(DumpError::Unauthorized("401".to_string()).is_fatal());
    }

    #[test]
    fn test_io_error_names_path_and_operation() {
        let err = DumpError::io(
            "open",
            "/tmp/out/pods/default.ndjson",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        let message = err.to_string();
        assert!(message.starts_with("Failed to open /tmp/out/pods/default.ndjson"));
    }
}
