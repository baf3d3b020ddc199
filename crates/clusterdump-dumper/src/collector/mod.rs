//! Data sources feeding the dump pipeline
//!
//! A collector turns one resource type into an ordered stream of raw objects.
//! Two implementations exist: the live Kubernetes API collector and a file
//! collector replaying an earlier dataset.

pub mod file;
pub mod live;
pub mod rate_limit;

pub use file::FileCollector;
pub use live::{KubeApiClient, LiveCollector, Page, PageSource};
pub use rate_limit::RateLimiter;

use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{CollectorConfig, CollectorType};
use crate::error::{DumpError, Result};
use crate::resource::{RawObject, ResourceType};

/// Objects of one resource type, in collection order
pub type RecordStream = BoxStream<'static, Result<RawObject>>;

pub enum Collector {
    Live(LiveCollector),
    File(FileCollector),
}

impl Collector {
    /// Build the collector selected by `collector.type`
    pub fn from_config(config: &CollectorConfig) -> Result<Self> {
        let collector = match config.collector_type {
            CollectorType::LiveK8sApi => Collector::Live(LiveCollector::from_config(&config.live)?),
            CollectorType::File => {
                let path = config.file.directory.as_deref().ok_or_else(|| {
                    DumpError::config("collector.file.directory is required for the file collector")
                })?;
                Collector::File(FileCollector::open(path)?)
            },
        };

        info!(
            collector = collector.name(),
            cluster = collector.cluster_name(),
            "Collector ready"
        );

        Ok(collector)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Collector::Live(_) => CollectorType::LiveK8sApi.as_str(),
            Collector::File(_) => CollectorType::File.as_str(),
        }
    }

    pub fn cluster_name(&self) -> &str {
        match self {
            Collector::Live(c) => c.cluster_name(),
            Collector::File(c) => c.cluster_name(),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Collector::Live(_))
    }

    /// Stream every object of `resource` until exhausted, failed or cancelled
    pub fn produce(&self, resource: ResourceType, cancel: CancellationToken) -> RecordStream {
        match self {
            Collector::Live(c) => c.produce(resource, cancel),
            Collector::File(c) => c.produce(resource, cancel),
        }
    }

    /// Release resources held by the collector. Background page fetchers
    /// stop on their own once their streams are dropped.
    pub fn close(&self) -> Result<()> {
        info!(collector = self.name(), "Collector closed");
        Ok(())
    }
}

/// Ask for confirmation before scraping a live cluster.
///
/// Returns `Ok(true)` without prompting for the file collector or when
/// `non_interactive` is set; otherwise defers to `prompt`.
pub fn confirm_start<F>(collector: &Collector, non_interactive: bool, prompt: F) -> Result<bool>
where
    F: FnOnce(&str) -> Result<bool>,
{
    if !collector.is_live() || non_interactive {
        return Ok(true);
    }

    prompt(&format!(
        "Dump all resources from cluster '{}'?",
        collector.cluster_name()
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::LiveCollectorConfig;
    use std::cell::Cell;
    use tempfile::TempDir;

    fn live() -> Collector {
        Collector::Live(LiveCollector::from_config(&LiveCollectorConfig::default()).unwrap())
    }

    #[test]
    fn test_live_scrape_asks_for_confirmation() {
        let asked = Cell::new(false);
        let approved = confirm_start(&live(), false, |message| {
            asked.set(true);
            assert!(message.contains("'default'"));
            Ok(false)
        })
        .unwrap();

        assert!(asked.get());
        assert!(!approved);
    }

    #[test]
    fn test_non_interactive_skips_prompt() {
        let approved = confirm_start(&live(), true, |_| panic!("prompted")).unwrap();
        assert!(approved);
    }

    #[test]
    fn test_file_collector_never_prompts() {
        let dir = TempDir::new().unwrap();
        let collector = Collector::File(FileCollector::open(dir.path()).unwrap());
        assert!(confirm_start(&collector, false, |_| panic!("prompted")).unwrap());
        assert_eq!(collector.name(), "file-collector");
    }

    #[test]
    fn test_from_config_requires_file_directory() {
        let config = CollectorConfig {
            collector_type: CollectorType::File,
            ..Default::default()
        };
        assert!(matches!(
            Collector::from_config(&config),
            Err(DumpError::Config(_))
        ));
    }
}
