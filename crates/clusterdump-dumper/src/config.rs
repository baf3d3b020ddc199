//! Configuration management
//!
//! Options are layered, later sources winning:
//!
//! 1. built-in defaults
//! 2. an optional YAML/TOML/JSON file (`--config`)
//! 3. `CLUSTERDUMP__*` environment variables, `__` separating nesting levels
//!    (`CLUSTERDUMP__COLLECTOR__LIVE__PAGE_SIZE=250`)
//!
//! Every recognized option is validated before any I/O happens.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clusterdump_common::types::is_path_segment;
use serde::{Deserialize, Serialize};

use crate::cache::CacheOptions;
use crate::error::{DumpError, Result};
use crate::resource::ResourceType;

// ============================================================================
// Collector Constants
// ============================================================================

pub const COLLECTOR_TYPE_FILE: &str = "file-collector";
pub const COLLECTOR_TYPE_K8S_API: &str = "live-k8s-api-collector";

/// Default number of items requested per page.
pub const DEFAULT_K8S_API_PAGE_SIZE: u32 = 500;

/// Default number of pages buffered between the page fetcher and its worker.
pub const DEFAULT_K8S_API_PAGE_BUFFER_SIZE: usize = 10;

/// Default request rate across all resource types.
pub const DEFAULT_K8S_API_RATE_LIMIT_PER_SECOND: u32 = 100;

pub const DEFAULT_K8S_API_SERVER: &str = "https://kubernetes.default.svc";
pub const DEFAULT_K8S_API_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CLUSTER_NAME: &str = "default";

// ============================================================================
// Dump / Ingestor Constants
// ============================================================================

pub const DEFAULT_OUTPUT_DIR: &str = "./dumps";

/// Records written between two periodic flushes of a worker's writer.
pub const DEFAULT_FLUSH_EVERY: usize = 1000;

pub const DEFAULT_INGESTOR_ENDPOINT: &str = "http://127.0.0.1:9000";
pub const DEFAULT_INGESTOR_TIMEOUT_SECS: u64 = 60;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CLUSTERDUMP";

/// Which collector feeds the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CollectorType {
    #[serde(rename = "file-collector")]
    File,
    #[default]
    #[serde(rename = "live-k8s-api-collector")]
    LiveK8sApi,
}

impl CollectorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectorType::File => COLLECTOR_TYPE_FILE,
            CollectorType::LiveK8sApi => COLLECTOR_TYPE_K8S_API,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DumpConfig {
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub cache: CacheOptions,
    #[serde(default)]
    pub dump: DumpOptions,
    #[serde(default)]
    pub ingestor: IngestorConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(rename = "type", default)]
    pub collector_type: CollectorType,

    /// Skip the confirmation prompt before a live scrape
    #[serde(default)]
    pub non_interactive: bool,

    #[serde(default)]
    pub live: LiveCollectorConfig,

    #[serde(default)]
    pub file: FileCollectorConfig,
}

/// Live Kubernetes API collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveCollectorConfig {
    /// Items requested by each list call, same for every resource type
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Pages buffered ahead of the consuming worker
    #[serde(default = "default_page_buffer_size")]
    pub page_buffer_size: usize,

    /// Requests per second across all resource types
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_second: u32,

    #[serde(default = "default_api_server")]
    pub api_server: String,

    #[serde(default)]
    pub bearer_token: Option<String>,

    /// PEM bundle used to verify the API server certificate
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,

    #[serde(default)]
    pub insecure_skip_tls_verify: bool,

    #[serde(default = "default_api_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,
}

/// File (replay) collector
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileCollectorConfig {
    /// Dataset directory or `.tar.gz` archive to replay
    #[serde(default)]
    pub directory: Option<PathBuf>,

    #[serde(default)]
    pub archive: FileArchiveConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileArchiveConfig {
    /// Name of the output archive; derived from cluster and run id when unset
    #[serde(default)]
    pub archive_name: Option<String>,

    /// Leave the dataset as a plain directory instead of a `.tar.gz`
    #[serde(default)]
    pub no_compress: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpOptions {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_flush_every")]
    pub flush_every: usize,

    #[serde(default = "default_resources")]
    pub resources: Vec<ResourceType>,

    /// Cap on concurrently running workers; one per resource type when unset
    #[serde(default)]
    pub worker_count: Option<NonZeroUsize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestorConfig {
    #[serde(default = "default_ingestor_endpoint")]
    pub api_endpoint: String,

    #[serde(default = "default_ingestor_timeout")]
    pub timeout_secs: u64,

    /// Skip collection when the latest ingest for the cluster is younger
    #[serde(default)]
    pub skip_if_fresher_than_secs: Option<u64>,
}

fn default_page_size() -> u32 {
    DEFAULT_K8S_API_PAGE_SIZE
}

fn default_page_buffer_size() -> usize {
    DEFAULT_K8S_API_PAGE_BUFFER_SIZE
}

fn default_rate_limit() -> u32 {
    DEFAULT_K8S_API_RATE_LIMIT_PER_SECOND
}

fn default_api_server() -> String {
    DEFAULT_K8S_API_SERVER.to_string()
}

fn default_api_timeout() -> u64 {
    DEFAULT_K8S_API_TIMEOUT_SECS
}

fn default_cluster_name() -> String {
    DEFAULT_CLUSTER_NAME.to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

fn default_flush_every() -> usize {
    DEFAULT_FLUSH_EVERY
}

fn default_resources() -> Vec<ResourceType> {
    ResourceType::ALL.to_vec()
}

fn default_ingestor_endpoint() -> String {
    DEFAULT_INGESTOR_ENDPOINT.to_string()
}

fn default_ingestor_timeout() -> u64 {
    DEFAULT_INGESTOR_TIMEOUT_SECS
}

impl Default for LiveCollectorConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            page_buffer_size: default_page_buffer_size(),
            rate_limit_per_second: default_rate_limit(),
            api_server: default_api_server(),
            bearer_token: None,
            ca_cert: None,
            insecure_skip_tls_verify: false,
            request_timeout_secs: default_api_timeout(),
            cluster_name: default_cluster_name(),
        }
    }
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            flush_every: default_flush_every(),
            resources: default_resources(),
            worker_count: None,
        }
    }
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            api_endpoint: default_ingestor_endpoint(),
            timeout_secs: default_ingestor_timeout(),
            skip_if_fresher_than_secs: None,
        }
    }
}

impl IngestorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DumpConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(DumpError::config(format!(
                    "configuration file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("dump.resources"),
        );

        let config: DumpConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| DumpError::config(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let live = &self.collector.live;

        if self.collector.collector_type == CollectorType::LiveK8sApi {
            if live.page_size == 0 {
                return Err(DumpError::config("collector.live.page_size must be greater than 0"));
            }
            if live.page_buffer_size == 0 {
                return Err(DumpError::config(
                    "collector.live.page_buffer_size must be greater than 0",
                ));
            }
            if live.rate_limit_per_second == 0 {
                return Err(DumpError::config(
                    "collector.live.rate_limit_per_second must be greater than 0",
                ));
            }
            if !is_path_segment(&live.cluster_name) {
                return Err(DumpError::config(format!(
                    "collector.live.cluster_name '{}' must be a plain name without path separators",
                    live.cluster_name
                )));
            }
            reqwest::Url::parse(&live.api_server).map_err(|e| {
                DumpError::config(format!(
                    "collector.live.api_server '{}' is not a valid URL: {}",
                    live.api_server, e
                ))
            })?;
        }

        if self.collector.collector_type == CollectorType::File
            && self.collector.file.directory.is_none()
        {
            return Err(DumpError::config(
                "collector.file.directory is required for the file collector",
            ));
        }

        if self.dump.flush_every == 0 {
            return Err(DumpError::config("dump.flush_every must be greater than 0"));
        }

        if self.dump.resources.is_empty() {
            return Err(DumpError::config("dump.resources cannot be empty"));
        }

        if self.ingestor.timeout_secs == 0 {
            return Err(DumpError::config("ingestor.timeout_secs must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = DumpConfig::default();
        assert_eq!(config.collector.collector_type, CollectorType::LiveK8sApi);
        assert_eq!(config.collector.live.page_size, 500);
        assert_eq!(config.collector.live.page_buffer_size, 10);
        assert_eq!(config.collector.live.rate_limit_per_second, 100);
        assert!(!config.collector.non_interactive);
        assert!(!config.collector.file.archive.no_compress);
        assert!(!config.cache.strict);
        assert_eq!(config.dump.resources.len(), ResourceType::ALL.len());
        config.validate().unwrap();
    }

    #[test]
    fn test_live_cluster_name_must_be_plain() {
        let mut config = DumpConfig::default();
        config.collector.live.cluster_name = "../other".to_string();
        assert!(matches!(config.validate(), Err(DumpError::Config(_))));

        config.collector.live.cluster_name = "prod-eu".to_string();
        config.validate().unwrap();
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "collector:\n  type: file-collector\n  file:\n    directory: /data/dump\n    archive:\n      no_compress: true\ncache:\n  strict: true"
        )
        .unwrap();

        let config = DumpConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.collector.collector_type, CollectorType::File);
        assert_eq!(config.collector.file.directory, Some(PathBuf::from("/data/dump")));
        assert!(config.collector.file.archive.no_compress);
        assert!(config.cache.strict);
    }

    #[test]
    #[serial]
    fn test_environment_overrides() {
        std::env::set_var("CLUSTERDUMP__COLLECTOR__LIVE__PAGE_SIZE", "250");
        std::env::set_var("CLUSTERDUMP__COLLECTOR__NON_INTERACTIVE", "true");

        let config = DumpConfig::load(None);

        std::env::remove_var("CLUSTERDUMP__COLLECTOR__LIVE__PAGE_SIZE");
        std::env::remove_var("CLUSTERDUMP__COLLECTOR__NON_INTERACTIVE");

        let config = config.unwrap();
        assert_eq!(config.collector.live.page_size, 250);
        assert!(config.collector.non_interactive);
    }

    #[test]
    #[serial]
    fn test_unknown_collector_type_is_a_config_error() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "collector:\n  type: carrier-pigeon").unwrap();

        assert!(matches!(
            DumpConfig::load(Some(file.path())),
            Err(DumpError::Config(_))
        ));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = DumpConfig::default();
        config.collector.live.rate_limit_per_second = 0;
        assert!(config.validate().is_err());

        let mut config = DumpConfig::default();
        config.collector.collector_type = CollectorType::File;
        assert!(config.validate().is_err());

        let mut config = DumpConfig::default();
        config.collector.live.api_server = "not a url".to_string();
        assert!(config.validate().is_err());
    }
}
