//! Build automation tasks for clusterdump
//!
//! - Generating the CLI reference from the clap definitions

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for clusterdump", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate the CLI reference in Markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let markdown = clap_markdown::help_markdown::<clusterdump_dumper::Cli>();

    let content = format!(
        r#"# clusterdump CLI Reference

This documentation is auto-generated from the CLI source code. Last updated: {}.

## Overview

`clusterdump` snapshots the security-relevant objects of a Kubernetes cluster
(nodes, pods, roles, role bindings, cluster roles, cluster role bindings and
endpoint slices) into a partitioned NDJSON dataset, optionally packages it as
a `.tar.gz` archive and submits it to an ingestor.

## Quick Start

```bash
# Dump the cluster reachable from inside a pod, keep the archive locally
clusterdump dump local --output-dir ./dumps

# Replay a previous archive through the pipeline
clusterdump dump local --from ./dumps/clusterdump_prod_<run>.tar.gz

# Dump and submit to the ingestor, unless a fresh dataset already exists
clusterdump --non-interactive dump remote

# Show what the ingestor holds for a cluster
clusterdump rehydrate --cluster prod
```

## Commands

{}

## Environment Variables

- `CLUSTERDUMP_CONFIG` - Path of a YAML/TOML configuration file
- `CLUSTERDUMP__<SECTION>__<KEY>` - Override any configuration key, e.g.
  `CLUSTERDUMP__COLLECTOR__LIVE__PAGE_SIZE=250`
- `LOG_LEVEL`, `LOG_FORMAT`, `LOG_OUTPUT`, `LOG_DIR` - Logging setup

## Configuration

```yaml
collector:
  type: live-k8s-api-collector
  live:
    api_server: https://kubernetes.default.svc
    page_size: 500
    page_buffer_size: 10
    rate_limit_per_second: 100
    cluster_name: prod
dump:
  output_dir: ./dumps
  flush_every: 1000
ingestor:
  api_endpoint: http://127.0.0.1:9000
  skip_if_fresher_than_secs: 3600
```

---

*To update, run `cargo xtask generate-cli-docs`.*
"#,
        chrono::Utc::now().format("%Y-%m-%d"),
        markdown
    );

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)?;

    let file_path = output_path.join("cli-reference.md");
    fs::write(&file_path, content)?;

    println!("✅ Generated CLI documentation at: {}", file_path.display());

    Ok(())
}
