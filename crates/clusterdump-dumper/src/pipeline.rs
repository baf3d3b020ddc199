//! Dump pipeline orchestration
//!
//! One run walks `Idle → Collecting → Flushing → Closed`:
//!
//! - **Collecting**: one worker task per resource type pulls objects from the
//!   collector, records their identity in the shared cache and appends them
//!   to its own [`FileWriter`]. Writers are never shared, so output paths of
//!   different types are disjoint.
//! - **Flushing**: every writer is flushed and closed, including after a
//!   fatal error or cancellation.
//! - **Closed**: the [`DumpReport`] is returned; the pipeline cannot run again.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clusterdump_common::types::{RunMetadata, METADATA_FILE_NAME};
use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::cache::{CacheOptions, CacheStats, MemCache};
use crate::collector::Collector;
use crate::config::{DumpConfig, DEFAULT_FLUSH_EVERY};
use crate::error::{DumpError, ErrorScope, Result};
use crate::resource::{RawObject, RecordIdentity, ResourceRecord, ResourceType};
use crate::writer::{FileWriter, WorkerHint};

/// Directory name of a run's dataset below `dump.output_dir`.
///
/// Characters outside `[A-Za-z0-9._-]` in the cluster name become `_`, so the
/// result is always a single path segment.
pub fn dataset_dir_name(cluster_name: &str, run_id: &uuid::Uuid) -> String {
    let cluster: String = cluster_name
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    format!("clusterdump_{}_{}", cluster, run_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Collecting,
    Flushing,
    Closed,
}

/// Outcome of one resource type's worker
#[derive(Debug)]
pub struct TypeReport {
    pub resource: ResourceType,
    pub written: u64,
    pub record_errors: u64,
    /// Error that stopped the worker early
    pub error: Option<DumpError>,
}

/// The output directory of a run
#[derive(Debug, Clone)]
pub struct Dataset {
    pub root: PathBuf,
    pub metadata: RunMetadata,
    /// False when the run hit a fatal error or was cancelled
    pub valid: bool,
}

#[derive(Debug)]
pub struct DumpReport {
    /// One entry per resource type, in resource type order
    pub types: Vec<TypeReport>,
    /// First run-wide error
    pub fatal: Option<DumpError>,
    pub cancelled: bool,
    pub cache: CacheStats,
    pub dataset: Dataset,
    pub elapsed: Duration,
}

impl DumpReport {
    pub fn total_written(&self) -> u64 {
        self.types.iter().map(|t| t.written).sum()
    }

    pub fn record_errors(&self) -> u64 {
        self.types.iter().map(|t| t.record_errors).sum()
    }

    pub fn failed_types(&self) -> impl Iterator<Item = &TypeReport> {
        self.types.iter().filter(|t| t.error.is_some())
    }

    pub fn type_report(&self, resource: ResourceType) -> Option<&TypeReport> {
        self.types.iter().find(|t| t.resource == resource)
    }

    /// The dataset is valid and every resource type ran to completion
    pub fn is_success(&self) -> bool {
        self.dataset.valid && self.failed_types().next().is_none()
    }
}

pub struct DumpPipeline {
    collector: Arc<Collector>,
    cache: Arc<MemCache<RecordIdentity>>,
    output_root: PathBuf,
    metadata: RunMetadata,
    resources: Vec<ResourceType>,
    worker_hint: WorkerHint,
    flush_every: usize,
    state: PipelineState,
}

impl DumpPipeline {
    pub fn new(collector: Collector, output_root: impl Into<PathBuf>, metadata: RunMetadata) -> Self {
        Self {
            collector: Arc::new(collector),
            cache: Arc::new(MemCache::new(CacheOptions::default())),
            output_root: output_root.into(),
            metadata,
            resources: ResourceType::ALL.to_vec(),
            worker_hint: WorkerHint::default(),
            flush_every: DEFAULT_FLUSH_EVERY,
            state: PipelineState::Idle,
        }
    }

    /// Build a pipeline writing below `dump.output_dir`
    pub fn from_config(collector: Collector, config: &DumpConfig) -> Self {
        let metadata = RunMetadata::new(collector.cluster_name());
        let output_root = config
            .dump
            .output_dir
            .join(dataset_dir_name(&metadata.cluster_name, &metadata.run_id));

        let worker_hint = match config.dump.worker_count {
            Some(n) => WorkerHint::Fixed(n),
            None => WorkerHint::PerResourceType,
        };

        Self::new(collector, output_root, metadata)
            .with_cache_options(config.cache)
            .with_resources(config.dump.resources.clone())
            .with_worker_hint(worker_hint)
            .with_flush_every(config.dump.flush_every)
    }

    pub fn with_cache_options(mut self, options: CacheOptions) -> Self {
        self.cache = Arc::new(MemCache::new(options));
        self
    }

    pub fn with_resources(mut self, mut resources: Vec<ResourceType>) -> Self {
        resources.sort();
        resources.dedup();
        self.resources = resources;
        self
    }

    pub fn with_worker_hint(mut self, hint: WorkerHint) -> Self {
        self.worker_hint = hint;
        self
    }

    pub fn with_flush_every(mut self, records: usize) -> Self {
        self.flush_every = records.max(1);
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    pub fn cache(&self) -> &MemCache<RecordIdentity> {
        &self.cache
    }

    /// Run the pipeline once.
    ///
    /// Cancelling `cancel` stops every worker; writers are still flushed and
    /// closed and the report marks the dataset invalid.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<DumpReport> {
        if self.state != PipelineState::Idle {
            return Err(DumpError::Pipeline(format!(
                "pipeline for run {} already ran",
                self.metadata.run_id
            )));
        }

        let started = Instant::now();
        self.state = PipelineState::Collecting;

        info!(
            run_id = %self.metadata.run_id,
            cluster = %self.metadata.cluster_name,
            collector = self.collector.name(),
            output = %self.output_root.display(),
            resources = self.resources.len(),
            "Starting dump"
        );

        if let Err(e) = self.write_metadata() {
            self.state = PipelineState::Closed;
            return Err(e);
        }

        let run_token = cancel.child_token();
        let writers: Vec<FileWriter> = self
            .resources
            .iter()
            .map(|r| FileWriter::open(&self.output_root, r.as_str()).with_worker_hint(self.worker_hint))
            .collect();

        let permits = match writers.first().map(FileWriter::worker_hint) {
            Some(WorkerHint::Fixed(n)) => Some(Arc::new(Semaphore::new(n.get()))),
            _ => None,
        };

        let mut workers = JoinSet::new();
        for (resource, writer) in self.resources.iter().copied().zip(writers) {
            let worker = Worker {
                resource,
                collector: Arc::clone(&self.collector),
                cache: Arc::clone(&self.cache),
                writer,
                flush_every: self.flush_every,
                cancel: run_token.clone(),
            };
            let permits = permits.clone();
            let span = info_span!("dump_worker", resource = %resource);
            workers.spawn(worker.run(permits).instrument(span));
        }

        let mut outcomes = Vec::with_capacity(self.resources.len());
        let mut fatal: Option<DumpError> = None;

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(mut outcome) => {
                    if let Some(e) = outcome.report.error.take() {
                        if e.is_fatal() {
                            run_token.cancel();
                            if fatal.is_none() {
                                fatal = Some(e);
                            } else {
                                outcome.report.error = Some(e);
                            }
                        } else {
                            outcome.report.error = Some(e);
                        }
                    }
                    outcomes.push(outcome);
                },
                Err(join_error) => {
                    error!(error = %join_error, "Dump worker panicked");
                    run_token.cancel();
                    fatal.get_or_insert(DumpError::Pipeline(format!(
                        "dump worker panicked: {}",
                        join_error
                    )));
                },
            }
        }

        self.state = PipelineState::Flushing;
        let mut types = Vec::with_capacity(outcomes.len());
        for WorkerOutcome { mut report, mut writer } in outcomes {
            let closed = writer.flush().and_then(|()| writer.close());
            if let Err(e) = closed {
                error!(resource = %report.resource, error = %e, "Failed to close writer");
                report.error.get_or_insert(e);
            }
            types.push(report);
        }
        types.sort_by_key(|t| t.resource);

        record_close(&mut fatal, "cache flush", self.cache.flush());
        record_close(&mut fatal, "cache close", self.cache.close());
        record_close(&mut fatal, "collector close", self.collector.close());
        self.state = PipelineState::Closed;

        let cancelled = cancel.is_cancelled();
        let valid = fatal.is_none() && !cancelled;
        let report = DumpReport {
            types,
            fatal,
            cancelled,
            cache: self.cache.stats(),
            dataset: Dataset {
                root: self.output_root.clone(),
                metadata: self.metadata.clone(),
                valid,
            },
            elapsed: started.elapsed(),
        };

        info!(
            run_id = %self.metadata.run_id,
            written = report.total_written(),
            record_errors = report.record_errors(),
            duplicates = report.cache.total_duplicates(),
            valid,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Dump finished"
        );

        Ok(report)
    }

    fn write_metadata(&self) -> Result<()> {
        std::fs::create_dir_all(&self.output_root)
            .map_err(|e| DumpError::io("create directory", &self.output_root, e))?;

        let path = self.output_root.join(METADATA_FILE_NAME);
        let content = serde_json::to_vec_pretty(&self.metadata)?;
        std::fs::write(&path, content).map_err(|e| DumpError::io("write", &path, e))
    }
}

/// Keep a failed teardown step as the run's fatal error instead of losing the report
fn record_close(fatal: &mut Option<DumpError>, step: &str, result: Result<()>) {
    if let Err(e) = result {
        error!(step, error = %e, "Failed to close pipeline resource");
        fatal.get_or_insert(e);
    }
}

struct WorkerOutcome {
    report: TypeReport,
    writer: FileWriter,
}

struct Worker {
    resource: ResourceType,
    collector: Arc<Collector>,
    cache: Arc<MemCache<RecordIdentity>>,
    writer: FileWriter,
    flush_every: usize,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self, permits: Option<Arc<Semaphore>>) -> WorkerOutcome {
        let mut report = TypeReport {
            resource: self.resource,
            written: 0,
            record_errors: 0,
            error: None,
        };

        let cancel = self.cancel.clone();
        let _permit = match permits {
            Some(semaphore) => tokio::select! {
                _ = cancel.cancelled() => return self.finish(report),
                permit = semaphore.acquire_owned() => permit.ok(),
            },
            None => None,
        };

        debug!("Worker started");
        let mut stream = self.collector.produce(self.resource, cancel.clone());

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = stream.next() => next,
            };
            let Some(item) = next else {
                break;
            };

            match item.and_then(|object| self.store(&object)) {
                Ok(()) => {
                    report.written += 1;
                    if report.written % self.flush_every as u64 == 0 {
                        if let Err(e) = self.writer.flush() {
                            report.error = Some(e);
                            break;
                        }
                    }
                },
                Err(e) => match e.scope() {
                    ErrorScope::Record => {
                        report.record_errors += 1;
                        warn!(error = %e, "Skipping record");
                    },
                    ErrorScope::Worker => {
                        error!(error = %e, "Worker stopped");
                        report.error = Some(e);
                        break;
                    },
                    ErrorScope::Pipeline => {
                        error!(error = %e, "Aborting dump");
                        cancel.cancel();
                        report.error = Some(e);
                        break;
                    },
                },
            }
        }

        info!(
            written = report.written,
            record_errors = report.record_errors,
            "Worker finished"
        );

        self.finish(report)
    }

    fn store(&mut self, object: &RawObject) -> Result<()> {
        let record = ResourceRecord::from_object(object)?;
        self.cache.put(&record.key, record.identity)?;
        self.writer.write(&record.data, &record.relative_path)
    }

    fn finish(self, report: TypeReport) -> WorkerOutcome {
        WorkerOutcome {
            report,
            writer: self.writer,
        }
    }
}
