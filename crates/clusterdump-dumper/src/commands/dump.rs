//! `clusterdump dump` command implementation
//!
//! Collects a snapshot, packages it and, in remote mode, submits it to the
//! ingest service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use clusterdump_common::api::IngestApi;
use clusterdump_common::types::{
    DatasetRef, IngestRequest, IngestResponse, IngestedDataset, RehydrateLatestRequest,
};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{format_bytes, format_time};
use crate::archive;
use crate::collector::{confirm_start, Collector};
use crate::config::{CollectorType, DumpConfig, IngestorConfig};
use crate::error::{DumpError, Result};
use crate::ingest::{should_collect, HttpIngestClient};
use crate::pipeline::{DumpPipeline, DumpReport};
use crate::DumpArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpMode {
    Local { no_compress: bool },
    Remote,
}

#[derive(Debug)]
pub enum DumpOutcome {
    /// The latest ingest was fresh enough; nothing was collected
    Skipped { latest: IngestedDataset },
    Completed {
        report: DumpReport,
        /// Set when the dataset was complete and packaged
        dataset: Option<DatasetRef>,
        ingested: Option<IngestResponse>,
    },
}

impl DumpOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            DumpOutcome::Skipped { .. } => true,
            DumpOutcome::Completed { report, .. } => report.is_success(),
        }
    }
}

impl DumpArgs {
    /// Override configuration with command-line options
    pub fn apply(&self, config: &mut DumpConfig) {
        if let Some(from) = &self.from {
            config.collector.collector_type = CollectorType::File;
            config.collector.file.directory = Some(from.clone());
        }
        if let Some(output_dir) = &self.output_dir {
            config.dump.output_dir = output_dir.clone();
        }
        if let Some(name) = &self.archive_name {
            config.collector.file.archive.archive_name = Some(name.clone());
        }
        if !self.resources.is_empty() {
            config.dump.resources = self.resources.clone();
        }
        if self.strict {
            config.cache.strict = true;
        }
    }
}

/// Run a dump.
///
/// `prompt` is asked to confirm a live scrape unless the configuration is
/// non-interactive.
pub async fn run<F>(
    mut config: DumpConfig,
    args: &DumpArgs,
    mode: DumpMode,
    prompt: F,
    cancel: CancellationToken,
) -> Result<DumpOutcome>
where
    F: FnOnce(&str) -> Result<bool>,
{
    args.apply(&mut config);
    config.validate()?;

    let collector = Collector::from_config(&config.collector)?;

    let client = match mode {
        DumpMode::Remote => Some(HttpIngestClient::from_config(&config.ingestor)?),
        DumpMode::Local { .. } => None,
    };

    if let Some(client) = &client {
        if let Some(latest) =
            fresh_dataset(client, collector.cluster_name(), &config.ingestor).await?
        {
            println!(
                "{} Skipping dump: cluster '{}' was ingested at {}",
                "→".cyan(),
                latest.cluster_name,
                format_time(&latest.ingested_at)
            );
            return Ok(DumpOutcome::Skipped { latest });
        }
    }

    if !confirm_start(&collector, config.collector.non_interactive, prompt)? {
        return Err(DumpError::Cancelled);
    }

    let mut pipeline = DumpPipeline::from_config(collector, &config);
    let report = pipeline.run(cancel).await?;
    print_summary(&report);

    if !report.is_success() {
        warn!(
            root = %report.dataset.root.display(),
            "Dataset incomplete; not packaging"
        );
        return Ok(DumpOutcome::Completed {
            report,
            dataset: None,
            ingested: None,
        });
    }

    let compress = match mode {
        DumpMode::Local { no_compress } => {
            !(no_compress || config.collector.file.archive.no_compress)
        },
        DumpMode::Remote => true,
    };

    let dataset = if compress {
        let archive_path = archive_path(&config, &report);
        let dataset = archive::package_dataset(&report.dataset.root, &archive_path)?;
        std::fs::remove_dir_all(&report.dataset.root)
            .map_err(|e| DumpError::io("remove", &report.dataset.root, e))?;
        dataset
    } else {
        archive::directory_dataset(&report.dataset.root)
    };

    println!(
        "{} Dataset written to {}",
        "✓".green(),
        dataset.location.bold()
    );
    if dataset.compressed {
        println!("  Size:   {}", format_bytes(dataset.size_bytes));
        println!("  SHA256: {}", dataset.sha256);
    }

    let ingested = match &client {
        Some(client) => {
            let metadata = &report.dataset.metadata;
            let response = client
                .ingest(IngestRequest {
                    run_id: metadata.run_id,
                    cluster_name: metadata.cluster_name.clone(),
                    dataset: dataset.clone(),
                })
                .await?;

            info!(run_id = %response.run_id, "Dataset ingested");
            println!(
                "{} Ingested run {} at {}",
                "✓".green(),
                response.run_id,
                format_time(&response.accepted_at)
            );
            Some(response)
        },
        None => None,
    };

    Ok(DumpOutcome::Completed {
        report,
        dataset: Some(dataset),
        ingested,
    })
}

/// The latest ingest for `cluster_name` when it is fresher than
/// `ingestor.skip_if_fresher_than_secs`
pub async fn fresh_dataset(
    api: &dyn IngestApi,
    cluster_name: &str,
    config: &IngestorConfig,
) -> Result<Option<IngestedDataset>> {
    let Some(max_age) = config.skip_if_fresher_than_secs else {
        return Ok(None);
    };

    let request = RehydrateLatestRequest {
        cluster_name: cluster_name.to_string(),
    };

    match api.rehydrate_latest(request).await {
        Ok(response) => {
            let latest = response.latest;
            if should_collect(latest.as_ref(), Utc::now(), Some(Duration::from_secs(max_age))) {
                Ok(None)
            } else {
                Ok(latest)
            }
        },
        Err(e) if e.is_unimplemented() => {
            warn!(error = %e, "Ingest service cannot rehydrate; collecting anyway");
            Ok(None)
        },
        Err(e) => Err(e.into()),
    }
}

fn archive_path(config: &DumpConfig, report: &DumpReport) -> PathBuf {
    let metadata = &report.dataset.metadata;
    let name = match &config.collector.file.archive.archive_name {
        Some(name) if name.ends_with(".tar.gz") || name.ends_with(".tgz") => name.clone(),
        Some(name) => format!("{}.{}", name, archive::ARCHIVE_EXTENSION),
        None => archive::archive_name(&metadata.cluster_name, &metadata.run_id),
    };

    let parent = report
        .dataset
        .root
        .parent()
        .unwrap_or_else(|| Path::new("."));
    parent.join(name)
}

fn print_summary(report: &DumpReport) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Resource", "Written", "Errors", "Status"]);

    for t in &report.types {
        let status = match &t.error {
            Some(e) => format!("failed: {}", e),
            None => "ok".to_string(),
        };
        table.add_row(vec![
            t.resource.to_string(),
            t.written.to_string(),
            t.record_errors.to_string(),
            status,
        ]);
    }

    println!();
    println!("{}", table);
    println!(
        "  Run {} ({}) in {:.1}s, {} duplicates",
        report.dataset.metadata.run_id,
        report.dataset.metadata.cluster_name,
        report.elapsed.as_secs_f64(),
        report.cache.total_duplicates()
    );

    if let Some(fatal) = &report.fatal {
        println!("{} Dump aborted: {}", "✗".red(), fatal);
    } else if report.cancelled {
        println!("{} Dump cancelled", "✗".red());
    }
}
