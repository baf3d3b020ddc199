//! clusterdump dumper library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Collects a point-in-time snapshot of a Kubernetes cluster's security
//! relevant objects and writes it as an on-disk dataset.
//!
//! # Overview
//!
//! - **Collectors**: live Kubernetes API (paginated, rate limited) or replay
//!   of an earlier dataset ([`collector`])
//! - **Cache**: run-wide identity bookkeeping with a configurable overwrite
//!   policy ([`cache`])
//! - **Writer**: lazily opened, buffered per-resource-type output files
//!   ([`writer`])
//! - **Pipeline**: one worker per resource type, flush and close on every
//!   exit path ([`pipeline`])
//! - **Ingest**: package the dataset and hand it to the ingest service
//!   ([`archive`], [`ingest`])
//!
//! # Example
//!
//! ```no_run
//! use clusterdump_dumper::collector::Collector;
//! use clusterdump_dumper::config::DumpConfig;
//! use clusterdump_dumper::pipeline::DumpPipeline;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> clusterdump_dumper::Result<()> {
//!     let config = DumpConfig::load(None)?;
//!     let collector = Collector::from_config(&config.collector)?;
//!     let mut pipeline = DumpPipeline::from_config(collector, &config);
//!     let report = pipeline.run(CancellationToken::new()).await?;
//!     println!("{} objects written", report.total_written());
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod cache;
pub mod collector;
pub mod commands;
pub mod config;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod resource;
pub mod writer;

// Re-export commonly used types
pub use error::{DumpError, ErrorScope, Result};
pub use pipeline::{DumpPipeline, DumpReport};
pub use resource::ResourceType;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

/// clusterdump - Kubernetes cluster snapshot dumper
#[derive(Parser, Debug)]
#[command(name = "clusterdump")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "CLUSTERDUMP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Do not ask for confirmation before scraping a live cluster
    #[arg(long, global = true)]
    pub non_interactive: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collect a cluster snapshot
    Dump {
        #[command(subcommand)]
        command: DumpCommand,
    },

    /// Submit an existing dataset archive to the ingest service
    Ingest {
        /// Archive produced by `clusterdump dump local`
        archive: PathBuf,

        /// Cluster name (read from the archive metadata when omitted)
        #[arg(long)]
        cluster: Option<String>,

        /// Run id (read from the archive metadata when omitted)
        #[arg(long)]
        run_id: Option<Uuid>,
    },

    /// Show the latest ingested dataset for a cluster
    Rehydrate {
        /// Cluster name (defaults to the configured cluster)
        #[arg(long)]
        cluster: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum DumpCommand {
    /// Collect and keep the dataset on local disk
    Local {
        #[command(flatten)]
        args: DumpArgs,

        /// Leave the dataset as a directory instead of a .tar.gz archive
        #[arg(long)]
        no_compress: bool,
    },

    /// Collect, package and submit the dataset to the ingest service
    Remote {
        #[command(flatten)]
        args: DumpArgs,
    },
}

/// Options shared by every dump mode
#[derive(Args, Debug, Clone, Default)]
pub struct DumpArgs {
    /// Replay a dataset directory or archive instead of the live API
    #[arg(long)]
    pub from: Option<PathBuf>,

    /// Output directory for datasets
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Archive file name
    #[arg(long)]
    pub archive_name: Option<String>,

    /// Resource types to collect (comma separated, default: all)
    #[arg(long, value_delimiter = ',')]
    pub resources: Vec<ResourceType>,

    /// Reject duplicate objects instead of overwriting them
    #[arg(long)]
    pub strict: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_dump_local() {
        let cli = Cli::try_parse_from([
            "clusterdump",
            "--non-interactive",
            "dump",
            "local",
            "--no-compress",
            "--resources",
            "pods,nodes",
        ])
        .unwrap();

        assert!(cli.non_interactive);
        match cli.command {
            Commands::Dump {
                command: DumpCommand::Local { args, no_compress },
            } => {
                assert!(no_compress);
                assert_eq!(args.resources, vec![ResourceType::Pods, ResourceType::Nodes]);
            },
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
